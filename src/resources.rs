//! Placement of stage weights on the accelerator.
//!
//! A [`ResourcePlan`] is resolved once from configuration and applied to both
//! stages by the [`ResourceManager`] before the first request. Nothing in the
//! plan can be changed afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ResourceConfig;
use crate::error::{CascadeError, Result};
use crate::models::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

impl FromStr for Device {
    type Err = CascadeError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            _ => s
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| CascadeError::ConfigError(format!("Unknown device: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    BF16,
    F16,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::BF16 => write!(f, "bfloat16"),
            Precision::F16 => write!(f, "float16"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Weights moved to the device once and kept there.
    Resident(Device),
    /// Submodules visit the device only while they execute.
    Offloaded(Device),
    /// No accelerator; everything runs from host memory.
    Host,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Resident(device) => write!(f, "resident on {}", device),
            Placement::Offloaded(device) => write!(f, "offloaded to {}", device),
            Placement::Host => write!(f, "host"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileProfile {
    ReduceOverhead,
    MaxAutotune,
}

impl fmt::Display for CompileProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileProfile::ReduceOverhead => write!(f, "reduce-overhead"),
            CompileProfile::MaxAutotune => write!(f, "max-autotune"),
        }
    }
}

/// One configuration step handed to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDirective {
    Precision(Precision),
    MemoryEfficientAttention,
    Place(Placement),
    Compile(CompileProfile),
}

/// What a stage reports about its current configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub kind: StageKind,
    pub precision: Option<Precision>,
    pub memory_efficient_attention: bool,
    pub placement: Option<Placement>,
    pub compiled: Option<CompileProfile>,
}

impl StageStatus {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            precision: None,
            memory_efficient_attention: false,
            placement: None,
            compiled: None,
        }
    }

    /// Folds a directive into the status; placement can only be set once.
    pub fn record(&mut self, directive: StageDirective) -> Result<()> {
        match directive {
            StageDirective::Precision(precision) => self.precision = Some(precision),
            StageDirective::MemoryEfficientAttention => self.memory_efficient_attention = true,
            StageDirective::Place(placement) => {
                if let Some(existing) = self.placement {
                    return Err(CascadeError::ServiceError(format!(
                        "{} stage already placed ({})",
                        self.kind, existing
                    )));
                }
                self.placement = Some(placement);
            }
            StageDirective::Compile(profile) => self.compiled = Some(profile),
        }
        Ok(())
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.kind,
            self.placement
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unplaced".to_string())
        )?;
        if let Some(precision) = self.precision {
            write!(f, ", {}", precision)?;
        }
        if let Some(profile) = self.compiled {
            write!(f, ", compiled ({})", profile)?;
        }
        Ok(())
    }
}

/// Implemented by both stages so one plan can configure them alike.
pub trait ManagedStage: Send {
    fn kind(&self) -> StageKind;
    fn configure(&mut self, directive: StageDirective) -> Result<()>;
    fn status(&self) -> StageStatus;
}

/// Releases cached accelerator memory between images.
pub trait DeviceMemory: Send {
    fn release_cached(&self) -> Result<()>;
}

/// Memory handle for host-only runs; there is no device cache to drop.
pub struct HostMemory;

impl DeviceMemory for HostMemory {
    fn release_cached(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourcePlan {
    pub placement: Placement,
    pub compiled: bool,
    pub precision: Precision,
    pub memory_efficient_attention: bool,
}

impl ResourcePlan {
    pub fn resolve(config: &ResourceConfig) -> Self {
        let precision = if config.fp16 {
            Precision::F16
        } else {
            Precision::BF16
        };

        let placement = if !config.device.is_accelerator() {
            log::warn!("⚠️  No accelerator selected, running on CPU");
            Placement::Host
        } else if config.lowvram {
            Placement::Offloaded(config.device)
        } else {
            Placement::Resident(config.device)
        };

        Self {
            placement,
            compiled: config.compile,
            precision,
            memory_efficient_attention: placement != Placement::Host,
        }
    }

    pub fn compile_profile(&self, kind: StageKind) -> Option<CompileProfile> {
        if !self.compiled {
            return None;
        }
        Some(match kind {
            StageKind::Prior => CompileProfile::ReduceOverhead,
            StageKind::Decoder => CompileProfile::MaxAutotune,
        })
    }

    /// Directives for one stage, in the order they must be applied.
    pub fn directives(&self, kind: StageKind) -> Vec<StageDirective> {
        let mut directives = vec![StageDirective::Precision(self.precision)];
        if self.memory_efficient_attention {
            directives.push(StageDirective::MemoryEfficientAttention);
        }
        directives.push(StageDirective::Place(self.placement));
        if let Some(profile) = self.compile_profile(kind) {
            directives.push(StageDirective::Compile(profile));
        }
        directives
    }
}

pub struct ResourceManager {
    plan: ResourcePlan,
}

impl ResourceManager {
    pub fn new(plan: ResourcePlan) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &ResourcePlan {
        &self.plan
    }

    pub fn apply<S: ManagedStage + ?Sized>(&self, stage: &mut S) -> Result<StageStatus> {
        let kind = stage.kind();
        for directive in self.plan.directives(kind) {
            log::debug!("⚙️  {} stage: {:?}", kind, directive);
            stage.configure(directive)?;
        }
        let status = stage.status();
        log::info!("🧩 {}", status);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(device: Device, lowvram: bool, compile: bool, fp16: bool) -> ResourceConfig {
        ResourceConfig {
            device,
            lowvram,
            compile,
            fp16,
        }
    }

    #[test]
    fn test_device_parsing() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
        assert!("tpu:0".parse::<Device>().is_err());
        assert_eq!(Device::Cuda(0).to_string(), "cuda:0");
    }

    #[test]
    fn test_plan_resolution() {
        let plan = ResourcePlan::resolve(&config(Device::Cuda(0), false, false, false));
        assert_eq!(plan.placement, Placement::Resident(Device::Cuda(0)));
        assert_eq!(plan.precision, Precision::BF16);
        assert!(plan.memory_efficient_attention);

        let plan = ResourcePlan::resolve(&config(Device::Cuda(0), true, true, true));
        assert_eq!(plan.placement, Placement::Offloaded(Device::Cuda(0)));
        assert_eq!(plan.precision, Precision::F16);
        assert_eq!(
            plan.compile_profile(StageKind::Prior),
            Some(CompileProfile::ReduceOverhead)
        );
        assert_eq!(
            plan.compile_profile(StageKind::Decoder),
            Some(CompileProfile::MaxAutotune)
        );

        let plan = ResourcePlan::resolve(&config(Device::Cpu, true, false, false));
        assert_eq!(plan.placement, Placement::Host);
        assert!(!plan.memory_efficient_attention);
    }

    #[test]
    fn test_directive_order() {
        let plan = ResourcePlan::resolve(&config(Device::Cuda(0), false, true, false));
        let directives = plan.directives(StageKind::Decoder);
        assert_eq!(
            directives,
            vec![
                StageDirective::Precision(Precision::BF16),
                StageDirective::MemoryEfficientAttention,
                StageDirective::Place(Placement::Resident(Device::Cuda(0))),
                StageDirective::Compile(CompileProfile::MaxAutotune),
            ]
        );
    }

    #[test]
    fn test_placement_is_fixed_once_recorded() {
        let mut status = StageStatus::new(StageKind::Prior);
        status
            .record(StageDirective::Place(Placement::Resident(Device::Cuda(0))))
            .unwrap();
        assert!(status
            .record(StageDirective::Place(Placement::Offloaded(Device::Cuda(0))))
            .is_err());
    }
}
