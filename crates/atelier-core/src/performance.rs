//! Frame-rate and memory monitoring with adaptive quality
//!
//! The monitor is a pure function of its state and the timestamps it is fed:
//! cooldowns compare the current frame time against the time of the last
//! adjustment, no timers are involved. Quality reductions are limited to one
//! per `reduction_cooldown_ms`; improvements wait
//! `reduction_cooldown_ms * improvement_cooldown_factor` after any adjustment
//! and only happen once a reduction has occurred.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::PerformanceConfig;
use crate::quality::{QualityLevel, QualitySettings};

/// Raw hints used to classify the device once
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceHints {
    pub device_memory_gb: Option<f32>,
    pub hardware_concurrency: Option<u32>,
    pub is_mobile: bool,
    pub device_pixel_ratio: f32,
}

impl Default for DeviceHints {
    fn default() -> Self {
        Self {
            device_memory_gb: None,
            hardware_concurrency: None,
            is_mobile: false,
            device_pixel_ratio: 1.0,
        }
    }
}

/// Coarse device classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTier {
    pub is_mobile: bool,
    pub is_low_end: bool,
}

impl DeviceTier {
    pub fn classify(hints: &DeviceHints) -> Self {
        let low_memory = hints.device_memory_gb.is_some_and(|gb| gb <= 2.0);
        let few_cores = hints.hardware_concurrency.is_some_and(|n| n <= 2);
        // Mobile browsers report at most 8 GiB; 4 cores or fewer there means an older SoC
        let weak_mobile = hints.is_mobile
            && hints.device_memory_gb.is_some_and(|gb| gb <= 3.0)
            && hints.hardware_concurrency.is_some_and(|n| n <= 4);

        Self {
            is_mobile: hints.is_mobile,
            is_low_end: low_memory || few_cores || weak_mobile,
        }
    }

    /// Highest quality this device may run at
    pub fn quality_ceiling(&self) -> QualityLevel {
        if self.is_low_end {
            QualityLevel::Low
        } else {
            QualityLevel::High
        }
    }
}

/// Tier-adjusted thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    /// Average FPS above which quality may be raised again
    pub fps_high: f64,
    pub fps_warning: f64,
    pub fps_critical: f64,
    pub memory_warning_mb: f64,
    pub memory_critical_mb: f64,
}

impl PerformanceThresholds {
    pub fn for_tier(tier: &DeviceTier) -> Self {
        let fps_offset = if tier.is_mobile { 5.0 } else { 0.0 };
        let memory_factor = if tier.is_mobile || tier.is_low_end { 0.5 } else { 1.0 };
        Self {
            fps_high: 55.0 - fps_offset,
            fps_warning: 45.0 - fps_offset,
            fps_critical: 30.0 - fps_offset,
            memory_warning_mb: 512.0 * memory_factor,
            memory_critical_mb: 1024.0 * memory_factor,
        }
    }
}

/// Point-in-time memory usage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub used_mb: f64,
    pub limit_mb: Option<f64>,
}

/// Source of memory readings (`performance.memory` in browsers that have it)
pub trait MemoryProbe: Send {
    fn sample(&self) -> Option<MemorySample>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    LowFrameRate,
    HighMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWarning {
    pub severity: WarningSeverity,
    pub kind: WarningKind,
    pub value: f64,
    pub threshold: f64,
    pub timestamp_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    LowFrameRate,
    HighMemory,
    Recovered,
}

/// Event emitted by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PerformanceEvent {
    Warning(PerformanceWarning),
    QualityAdjusted {
        from: QualityLevel,
        to: QualityLevel,
        reason: AdjustmentReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FpsStats {
    pub current: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// 0..1, higher means steadier frame pacing
    pub stability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub used_mb: f64,
    pub limit_mb: Option<f64>,
    pub usage_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStatus {
    pub quality: QualityLevel,
    pub quality_ceiling: QualityLevel,
    pub is_degraded: bool,
    pub is_low_end_device: bool,
    pub is_mobile: bool,
    pub degradations: u32,
}

/// Aggregate snapshot returned by [`PerformanceMonitor::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub fps: FpsStats,
    pub frame_time_ms: Option<f64>,
    pub memory: Option<MemoryStats>,
    pub performance: PerformanceStatus,
    pub sample_count: usize,
}

/// Per-frame performance monitor and quality controller
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    tier: DeviceTier,
    thresholds: PerformanceThresholds,
    device_pixel_ratio: f32,
    samples: VecDeque<f64>,
    last_timestamp: Option<f64>,
    last_frame_time_ms: Option<f64>,
    memory: Option<MemorySample>,
    memory_probe: Option<Box<dyn MemoryProbe>>,
    quality: QualityLevel,
    degradations: u32,
    last_reduction_at: Option<f64>,
    last_adjustment_at: Option<f64>,
    last_fps_warning_at: Option<f64>,
    last_memory_warning_at: Option<f64>,
    events: broadcast::Sender<PerformanceEvent>,
}

impl PerformanceMonitor {
    pub fn new(config: PerformanceConfig, hints: DeviceHints) -> Self {
        let tier = DeviceTier::classify(&hints);
        let thresholds = PerformanceThresholds::for_tier(&tier);
        let (events, _) = broadcast::channel(64);
        let capacity = config.window_size.max(1);

        info!(
            mobile = tier.is_mobile,
            low_end = tier.is_low_end,
            ceiling = %tier.quality_ceiling(),
            "Performance monitor initialized"
        );

        Self {
            config,
            tier,
            thresholds,
            device_pixel_ratio: hints.device_pixel_ratio,
            samples: VecDeque::with_capacity(capacity),
            last_timestamp: None,
            last_frame_time_ms: None,
            memory: None,
            memory_probe: None,
            quality: tier.quality_ceiling(),
            degradations: 0,
            last_reduction_at: None,
            last_adjustment_at: None,
            last_fps_warning_at: None,
            last_memory_warning_at: None,
            events,
        }
    }

    pub fn with_memory_probe(mut self, probe: Box<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    /// Subscribe to warnings and quality adjustments
    pub fn subscribe(&self) -> broadcast::Receiver<PerformanceEvent> {
        self.events.subscribe()
    }

    pub fn tier(&self) -> DeviceTier {
        self.tier
    }

    pub fn thresholds(&self) -> PerformanceThresholds {
        self.thresholds
    }

    fn capacity(&self) -> usize {
        self.config.window_size.max(1)
    }

    /// Feed the timestamp of a rendered frame (milliseconds)
    pub fn update(&mut self, now_ms: f64) {
        if let Some(prev) = self.last_timestamp {
            let delta = now_ms - prev;
            if delta > 0.0 {
                if self.samples.len() >= self.capacity() {
                    self.samples.pop_front();
                }
                self.samples.push_back(1000.0 / delta);
                self.last_frame_time_ms = Some(delta);
            } else {
                debug!(delta, "Ignoring non-increasing frame timestamp");
            }
        }
        self.last_timestamp = Some(self.last_timestamp.map_or(now_ms, |prev| prev.max(now_ms)));

        if let Some(probe) = &self.memory_probe {
            if let Some(sample) = probe.sample() {
                self.memory = Some(sample);
            }
        }

        self.evaluate(now_ms);
    }

    /// Record a memory reading taken outside the probe
    pub fn record_memory(&mut self, sample: MemorySample) {
        self.memory = Some(sample);
    }

    fn average_fps(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    fn evaluate(&mut self, now_ms: f64) {
        if self.samples.len() < self.config.min_samples {
            return;
        }
        let Some(average) = self.average_fps() else {
            return;
        };
        let memory_used = self.memory.map(|m| m.used_mb);

        let fps_critical = average < self.thresholds.fps_critical;
        let memory_critical = memory_used.is_some_and(|m| m > self.thresholds.memory_critical_mb);

        if fps_critical || memory_critical {
            let reason = if fps_critical {
                self.warn(now_ms, WarningSeverity::Critical, WarningKind::LowFrameRate, average, self.thresholds.fps_critical);
                AdjustmentReason::LowFrameRate
            } else {
                AdjustmentReason::HighMemory
            };
            if let (true, Some(used)) = (memory_critical, memory_used) {
                self.warn(now_ms, WarningSeverity::Critical, WarningKind::HighMemory, used, self.thresholds.memory_critical_mb);
            }
            self.try_reduce(now_ms, reason);
            return;
        }

        if average < self.thresholds.fps_warning {
            self.warn(now_ms, WarningSeverity::Warning, WarningKind::LowFrameRate, average, self.thresholds.fps_warning);
        }
        if let Some(used) = memory_used.filter(|m| *m > self.thresholds.memory_warning_mb) {
            self.warn(now_ms, WarningSeverity::Warning, WarningKind::HighMemory, used, self.thresholds.memory_warning_mb);
        }
        if average > self.thresholds.fps_high && self.degradations > 0 {
            self.try_improve(now_ms);
        }
    }

    fn warn(&mut self, now_ms: f64, severity: WarningSeverity, kind: WarningKind, value: f64, threshold: f64) {
        let last = match kind {
            WarningKind::LowFrameRate => &mut self.last_fps_warning_at,
            WarningKind::HighMemory => &mut self.last_memory_warning_at,
        };
        if last.is_some_and(|t| now_ms - t < self.config.warning_interval_ms) {
            return;
        }
        *last = Some(now_ms);

        warn!(?severity, ?kind, value, threshold, "Performance warning");
        let _ = self.events.send(PerformanceEvent::Warning(PerformanceWarning {
            severity,
            kind,
            value,
            threshold,
            timestamp_ms: now_ms,
        }));
    }

    fn try_reduce(&mut self, now_ms: f64, reason: AdjustmentReason) -> bool {
        if self
            .last_reduction_at
            .is_some_and(|t| now_ms - t < self.config.reduction_cooldown_ms)
        {
            return false;
        }
        let Some(next) = self.quality.step_down() else {
            return false;
        };

        let from = self.quality;
        self.quality = next;
        self.degradations += 1;
        self.last_reduction_at = Some(now_ms);
        self.last_adjustment_at = Some(now_ms);

        info!(from = %from, to = %next, ?reason, "Reducing render quality");
        let _ = self.events.send(PerformanceEvent::QualityAdjusted { from, to: next, reason });
        true
    }

    fn try_improve(&mut self, now_ms: f64) -> bool {
        let cooldown = self.config.reduction_cooldown_ms * self.config.improvement_cooldown_factor;
        if self.last_adjustment_at.is_some_and(|t| now_ms - t < cooldown) {
            return false;
        }
        let Some(next) = self.quality.step_up().filter(|q| *q <= self.tier.quality_ceiling()) else {
            return false;
        };

        let from = self.quality;
        self.quality = next;
        self.last_adjustment_at = Some(now_ms);

        info!(from = %from, to = %next, "Raising render quality");
        let _ = self.events.send(PerformanceEvent::QualityAdjusted {
            from,
            to: next,
            reason: AdjustmentReason::Recovered,
        });
        true
    }

    /// Quality the renderer should currently use
    pub fn recommended_quality(&self) -> QualityLevel {
        self.quality.min(self.tier.quality_ceiling())
    }

    /// Renderer settings for the recommended quality on this device
    pub fn quality_settings(&self) -> QualitySettings {
        QualitySettings::for_level(self.recommended_quality(), self.tier.is_mobile, self.device_pixel_ratio)
    }

    /// FPS samples in the window, oldest first
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Aggregate snapshot computed from the current window
    pub fn stats(&self) -> PerformanceStats {
        let count = self.samples.len();
        let fps = if count == 0 {
            FpsStats {
                current: 0.0,
                average: 0.0,
                min: 0.0,
                max: 0.0,
                stability: 1.0,
            }
        } else {
            let average = self.samples.iter().sum::<f64>() / count as f64;
            let min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let variance = self
                .samples
                .iter()
                .map(|s| (s - average).powi(2))
                .sum::<f64>()
                / count as f64;
            let stability = if average > 0.0 {
                (1.0 - variance.sqrt() / average).clamp(0.0, 1.0)
            } else {
                0.0
            };
            FpsStats {
                current: self.samples.back().copied().unwrap_or(0.0),
                average,
                min,
                max,
                stability,
            }
        };

        let memory = self.memory.map(|m| MemoryStats {
            used_mb: m.used_mb,
            limit_mb: m.limit_mb,
            usage_ratio: m.limit_mb.filter(|l| *l > 0.0).map(|l| m.used_mb / l),
        });

        let fps_degraded = count > 0 && fps.average < self.thresholds.fps_warning;
        let memory_degraded = self
            .memory
            .is_some_and(|m| m.used_mb > self.thresholds.memory_warning_mb);

        PerformanceStats {
            fps,
            frame_time_ms: self.last_frame_time_ms,
            memory,
            performance: PerformanceStatus {
                quality: self.recommended_quality(),
                quality_ceiling: self.tier.quality_ceiling(),
                is_degraded: fps_degraded || memory_degraded,
                is_low_end_device: self.tier.is_low_end,
                is_mobile: self.tier.is_mobile,
                degradations: self.degradations,
            },
            sample_count: count,
        }
    }
}
