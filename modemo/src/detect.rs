//! Two-phase automatic modem detection.
//!
//! Phase 1 quick-probes every candidate at the primary baud rate and stops at
//! the first port that answers. Only when nothing answers does phase 2
//! full-probe each candidate at the fallback rates, stopping per candidate at
//! its first working rate. Each probe is time-bounded, so one wedged device
//! delays the scan by at most one probe bound.

use {
    crate::{
        device::{DeviceClass, SerialPortCandidate},
        error::{Error, Result},
        port::FlowControl,
        probe::{ConnectionAttempt, ConnectionProbe, ProbeMode, ProbeOutcome},
    },
    log::{debug, info},
    std::{fmt, sync::Arc},
};

/// Baud rates tried during detection.
#[derive(Debug, Clone)]
pub struct DetectConfig {
    /// Phase 1 rate.
    pub primary_baud: u32,
    /// Phase 2 rates, in order.
    pub fallback_bauds: Vec<u32>,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            primary_baud: 115200,
            fallback_bauds: vec![9600, 460800, 57600, 19200],
        }
    }
}

/// A port that answered, with the settings it answered at.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WorkingPort {
    /// The candidate.
    pub candidate: SerialPortCandidate,
    /// Working baud rate.
    pub baud: u32,
    /// Working flow control.
    pub flow_control: FlowControl,
}

impl fmt::Display for WorkingPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} baud (flow control: {})",
            self.candidate.path, self.baud, self.flow_control
        )
    }
}

/// Detection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectPhase {
    /// Quick probes at the primary rate.
    Primary,
    /// Full probes at fallback rates.
    Fallback,
}

/// Progress notifications emitted during a scan.
#[derive(Debug)]
pub enum ScanEvent<'a> {
    /// A phase started.
    Phase(DetectPhase),
    /// A probe is about to start.
    Probing {
        /// Probed candidate.
        candidate: &'a SerialPortCandidate,
        /// Probed rate.
        baud: u32,
        /// Probe mode.
        mode: ProbeMode,
    },
    /// A probe finished.
    Finished(&'a ConnectionAttempt),
}

/// Everything a scan tried and what answered.
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    /// Every probe, in order.
    pub attempts: Vec<ConnectionAttempt>,
    /// Ports that answered. Empty means detection failed.
    pub working: Vec<WorkingPort>,
}

impl DetectionReport {
    /// Attempts that failed, for explaining an empty result.
    pub fn failures(&self) -> impl Iterator<Item = &ConnectionAttempt> {
        self.attempts
            .iter()
            .filter(|attempt| !attempt.outcome.is_success())
    }
}

/// What the caller should do with a non-empty result.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Exactly one port answered; use it.
    Single(WorkingPort),
    /// Several answered; ask the user.
    Choice {
        /// Every working port.
        options: Vec<WorkingPort>,
        /// Index into `options` of the likely AT interface.
        recommended: Option<usize>,
    },
}

type InterruptCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Orchestrates probes over the ranked candidate list.
pub struct AutoDetector {
    probe: ConnectionProbe,
    config: DetectConfig,
    interrupted: InterruptCheck,
}

impl AutoDetector {
    /// Create a detector. Interruption follows
    /// [`is_interrupted_requested`](crate::is_interrupted_requested).
    pub fn new(probe: ConnectionProbe, config: DetectConfig) -> Self {
        Self {
            probe,
            config,
            interrupted: Arc::new(crate::is_interrupted_requested),
        }
    }

    /// Replace the interruption check.
    #[must_use]
    pub fn with_interrupt_check(mut self, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.interrupted = Arc::new(check);
        self
    }

    /// Detection settings.
    pub fn config(&self) -> &DetectConfig {
        &self.config
    }

    fn probe_one(
        &self,
        candidate: &SerialPortCandidate,
        baud: u32,
        mode: ProbeMode,
        report: &mut DetectionReport,
        on_event: &mut dyn FnMut(ScanEvent<'_>),
    ) -> Result<bool> {
        if (self.interrupted)() {
            return Err(Error::Cancelled);
        }
        on_event(ScanEvent::Probing {
            candidate,
            baud,
            mode,
        });
        let attempt = self
            .probe
            .probe_candidate(candidate, baud, mode);
        on_event(ScanEvent::Finished(&attempt));

        let found = match attempt.outcome {
            ProbeOutcome::Success(flow_control) => {
                report
                    .working
                    .push(WorkingPort {
                        candidate: candidate.clone(),
                        baud,
                        flow_control,
                    });
                true
            },
            _ => false,
        };
        report
            .attempts
            .push(attempt);
        Ok(found)
    }

    /// Scan `candidates` (already ranked).
    ///
    /// Fails with [`Error::DeviceNotFound`] when there is nothing to scan and
    /// with [`Error::Cancelled`] when interrupted between probes. An empty
    /// [`DetectionReport::working`] means no port answered.
    pub fn scan(
        &self,
        candidates: &[SerialPortCandidate],
        on_event: &mut dyn FnMut(ScanEvent<'_>),
    ) -> Result<DetectionReport> {
        if candidates.is_empty() {
            return Err(Error::DeviceNotFound);
        }

        let mut report = DetectionReport::default();

        on_event(ScanEvent::Phase(DetectPhase::Primary));
        for candidate in candidates {
            if self.probe_one(
                candidate,
                self.config.primary_baud,
                ProbeMode::Quick,
                &mut report,
                on_event,
            )? {
                info!(
                    "Modem found on {} at {} baud",
                    candidate.path, self.config.primary_baud
                );
                return Ok(report);
            }
        }

        debug!("No answer at {} baud, trying fallback rates", self.config.primary_baud);
        on_event(ScanEvent::Phase(DetectPhase::Fallback));
        for candidate in candidates {
            for &baud in &self.config.fallback_bauds {
                if self.probe_one(candidate, baud, ProbeMode::Full, &mut report, on_event)? {
                    info!("Modem found on {} at {baud} baud", candidate.path);
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Scan without progress reporting.
    pub fn detect(&self, candidates: &[SerialPortCandidate]) -> Result<DetectionReport> {
        self.scan(candidates, &mut |_| {})
    }
}

/// Likely AT-command interface among several working ports.
///
/// Multi-interface USB modems commonly expose AT on the third (index 2) or
/// second (index 1) interface.
pub fn recommend(working: &[WorkingPort]) -> Option<usize> {
    [2, 1].into_iter().find_map(|index| {
        working.iter().position(|port| {
            port.candidate.class == DeviceClass::UsbSerial
                && port.candidate.interface == Some(index)
        })
    })
}

/// Decide how to present a detection result. `None` when nothing answered.
pub fn select(working: &[WorkingPort]) -> Option<Selection> {
    match working {
        [] => None,
        [single] => Some(Selection::Single(single.clone())),
        many => Some(Selection::Choice {
            options: many.to_vec(),
            recommended: recommend(many),
        }),
    }
}
