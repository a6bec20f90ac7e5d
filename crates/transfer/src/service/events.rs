use std::sync::Arc;
use std::time::Instant;

use super::event_sink::TransferEventSink;
use crate::models::{TransferDirection, TransferEvent};
use crate::transfer::stats::{TransferMeter, percent};

pub(crate) fn emit_event(sink: &dyn TransferEventSink, event: TransferEvent) {
    if let Err(error) = sink.emit(event) {
        tracing::warn!(
            event = "transfer_event_emit_failed",
            error_code = %error.code,
            error = error.to_string()
        );
    }
}

/// Turns byte counts into progress, file count and throughput events.
///
/// Percent events are only emitted when the integer value changes. Overall
/// progress credits each file with its planned size, not its wire size.
pub(crate) struct ProgressReporter {
    sink: Arc<dyn TransferEventSink>,
    direction: TransferDirection,
    meter: TransferMeter,
    files_total: u64,
    files_done: u64,
    credited: u64,
    current_planned: Option<u64>,
    current_credit: u64,
    last_overall: Option<u8>,
    last_file: Option<u8>,
}

impl ProgressReporter {
    pub(crate) fn new(
        sink: Arc<dyn TransferEventSink>,
        direction: TransferDirection,
        total_bytes: u64,
        files_total: u64,
    ) -> Self {
        Self {
            sink,
            direction,
            meter: TransferMeter::new(total_bytes, Instant::now()),
            files_total,
            files_done: 0,
            credited: 0,
            current_planned: None,
            current_credit: 0,
            last_overall: None,
            last_file: None,
        }
    }

    pub(crate) fn set_totals(&mut self, total_bytes: u64, files_total: u64) {
        self.meter.set_total(total_bytes);
        self.files_total = files_total;
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.meter.transferred()
    }

    pub(crate) fn files_done(&self) -> u64 {
        self.files_done
    }

    pub(crate) fn emit_file_count(&self) {
        self.emit(TransferEvent::FileCount {
            direction: self.direction,
            total: self.files_total,
            done: self.files_done,
            pending: self.files_total.saturating_sub(self.files_done),
        });
    }

    /// `planned_size` is the size announced in the metadata, when known.
    pub(crate) fn start_file(&mut self, planned_size: Option<u64>) {
        self.last_file = None;
        self.current_planned = planned_size;
        self.current_credit = 0;
    }

    pub(crate) fn advance(&mut self, path: &str, file_done: u64, file_size: u64, bytes: u64) {
        if let Some(sample) = self.meter.record(bytes, Instant::now()) {
            self.emit(TransferEvent::TransferStats {
                direction: self.direction,
                speed_mbps: sample.speed_mbps,
                eta_seconds: sample.eta_seconds,
                elapsed_seconds: sample.elapsed_seconds,
            });
        }
        self.current_credit = match self.current_planned {
            Some(planned) if file_size > 0 => {
                (u128::from(file_done) * u128::from(planned) / u128::from(file_size)) as u64
            }
            Some(_) => 0,
            None => file_done,
        };
        self.emit_file_percent(path, percent(file_done, file_size));
        self.emit_overall();
    }

    pub(crate) fn finish_file(&mut self, path: &str) {
        self.emit_file_percent(path, 100);
        self.credited += self.current_planned.take().unwrap_or(self.current_credit);
        self.current_credit = 0;
        self.files_done += 1;
        // Senders without metadata never announce a total.
        self.files_total = self.files_total.max(self.files_done);
        self.emit_file_count();
        self.emit_overall();
    }

    /// Final statistics and the completion event.
    pub(crate) fn complete(&mut self) {
        if self.last_overall != Some(100) {
            self.last_overall = Some(100);
            self.emit(TransferEvent::OverallProgress {
                direction: self.direction,
                percent: 100,
            });
        }
        let elapsed = self.meter.elapsed(Instant::now()).as_secs_f64();
        let speed_mbps = if elapsed > 0.0 {
            self.meter.transferred() as f64 / elapsed / (1024.0 * 1024.0)
        } else {
            0.0
        };
        self.emit(TransferEvent::TransferStats {
            direction: self.direction,
            speed_mbps,
            eta_seconds: Some(0.0),
            elapsed_seconds: elapsed,
        });
        self.emit(TransferEvent::Completed {
            direction: self.direction,
            bytes: self.meter.transferred(),
            files: self.files_done,
        });
    }

    fn emit_file_percent(&mut self, path: &str, value: u8) {
        if self.last_file == Some(value) {
            return;
        }
        self.last_file = Some(value);
        self.emit(TransferEvent::FileProgress {
            direction: self.direction,
            path: path.to_string(),
            percent: value,
        });
    }

    fn emit_overall(&mut self) {
        let value = percent(self.credited + self.current_credit, self.meter.total());
        if self.last_overall == Some(value) {
            return;
        }
        self.last_overall = Some(value);
        self.emit(TransferEvent::OverallProgress {
            direction: self.direction,
            percent: value,
        });
    }

    fn emit(&self, event: TransferEvent) {
        emit_event(self.sink.as_ref(), event);
    }
}
