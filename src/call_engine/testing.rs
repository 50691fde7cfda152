//! Test-Hilfen: steuerbare Uhr und Media-Geräte

use super::clock::Clock;
use super::media::{MediaConstraints, MediaDevices, MediaError, MediaStream};
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Uhr, die nur auf Anweisung weiterläuft
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 5, 2, 18, 0, 0).unwrap()),
        }
    }

    pub fn advance_millis(&self, millis: i64) {
        *self.now.lock() += Duration::milliseconds(millis);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Liefert sofort einen Stream oder den konfigurierten Fehler
#[derive(Default)]
pub struct FakeDevices {
    failure: Mutex<Option<MediaError>>,
    issued: Mutex<Vec<MediaStream>>,
}

impl FakeDevices {
    pub fn failing(error: MediaError) -> Self {
        Self {
            failure: Mutex::new(Some(error)),
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failure(&self, error: Option<MediaError>) {
        *self.failure.lock() = error;
    }

    /// Alle ausgegebenen Streams (Klone teilen den Track-Zustand)
    pub fn issued(&self) -> Vec<MediaStream> {
        self.issued.lock().clone()
    }
}

impl MediaDevices for FakeDevices {
    fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, MediaError>> {
        let result = match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => {
                let stream = MediaStream::from_constraints(constraints);
                self.issued.lock().push(stream.clone());
                Ok(stream)
            }
        };
        async move { result }.boxed()
    }
}

/// Hält jede Anforderung an, bis der Test sie freigibt
#[derive(Default)]
pub struct GatedDevices {
    pending: Mutex<Vec<(MediaConstraints, oneshot::Sender<Result<MediaStream, MediaError>>)>>,
}

impl GatedDevices {
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Beantwortet die älteste offene Anforderung
    pub fn complete(&self, ok: bool) -> Option<MediaStream> {
        let (constraints, tx) = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return None;
            }
            pending.remove(0)
        };

        if ok {
            let stream = MediaStream::from_constraints(constraints);
            let _ = tx.send(Ok(stream.clone()));
            Some(stream)
        } else {
            let _ = tx.send(Err(MediaError::PermissionDenied));
            None
        }
    }
}

impl MediaDevices for GatedDevices {
    fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, MediaError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().push((constraints, tx));
        async move {
            rx.await
                .unwrap_or_else(|_| Err(MediaError::Unavailable("request dropped".to_string())))
        }
        .boxed()
    }
}
