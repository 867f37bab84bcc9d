//! Process-wide model state.
//!
//! [`CascadeService`] owns both stages, the previewer and the device memory
//! handle. It is built explicitly, `init` applies the resource plan once, and
//! `shutdown` tears it down. Orchestrators borrow it; nothing reads model
//! state from globals.

use crate::config::Config;
use crate::error::{CascadeError, Result};
use crate::invoker::StageInvoker;
use crate::models::{TimestepSchedule, PRIOR_TIMESTEPS};
use crate::preview::PreviewExtractor;
use crate::resources::{DeviceMemory, HostMemory, ResourceManager, ResourcePlan, StageStatus};
use crate::stages::synthetic::{SyntheticDecoder, SyntheticDeviceMemory, SyntheticPrior};
use crate::stages::{DecoderStage, PriorStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Ready,
    ShutDown,
}

pub struct CascadeService {
    prior: Box<dyn PriorStage>,
    decoder: Box<dyn DecoderStage>,
    previewer: Option<PreviewExtractor>,
    memory: Box<dyn DeviceMemory>,
    resources: ResourceManager,
    timesteps: TimestepSchedule,
    state: ServiceState,
}

impl CascadeService {
    pub fn new(prior: Box<dyn PriorStage>, decoder: Box<dyn DecoderStage>, plan: ResourcePlan) -> Self {
        Self {
            prior,
            decoder,
            previewer: None,
            memory: Box::new(HostMemory),
            resources: ResourceManager::new(plan),
            timesteps: PRIOR_TIMESTEPS.clone(),
            state: ServiceState::Created,
        }
    }

    /// Service backed by the synthetic stages, configured from `config`.
    pub fn synthetic(config: &Config) -> Result<Self> {
        let plan = ResourcePlan::resolve(&config.resources);
        let previewer = PreviewExtractor::from_config(&config.preview)?;
        Ok(Self::new(
            Box::new(SyntheticPrior::new()),
            Box::new(SyntheticDecoder::new()),
            plan,
        )
        .with_previewer(previewer)
        .with_device_memory(Box::new(SyntheticDeviceMemory::new())))
    }

    pub fn with_previewer(mut self, previewer: Option<PreviewExtractor>) -> Self {
        self.previewer = previewer;
        self
    }

    pub fn with_device_memory(mut self, memory: Box<dyn DeviceMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn plan(&self) -> &ResourcePlan {
        self.resources.plan()
    }

    pub fn preview_enabled(&self) -> bool {
        self.previewer.is_some()
    }

    pub fn timesteps(&self) -> &TimestepSchedule {
        &self.timesteps
    }

    /// Applies the resource plan to both stages. Only valid once.
    pub fn init(&mut self) -> Result<()> {
        if self.state != ServiceState::Created {
            return Err(CascadeError::ServiceError(format!(
                "init called in state {:?}",
                self.state
            )));
        }
        self.resources.apply(self.prior.as_mut())?;
        self.resources.apply(self.decoder.as_mut())?;
        self.state = ServiceState::Ready;
        log::info!("✅ Cascade service ready");
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == ServiceState::ShutDown {
            return Ok(());
        }
        self.memory.release_cached()?;
        self.state = ServiceState::ShutDown;
        log::info!("👋 Cascade service shut down");
        Ok(())
    }

    pub fn invoker(&self) -> Result<StageInvoker<'_>> {
        self.ensure_ready()?;
        Ok(StageInvoker::new(
            self.prior.as_ref(),
            self.decoder.as_ref(),
            self.previewer.as_ref(),
            &self.timesteps,
        ))
    }

    pub fn release_cached_memory(&self) -> Result<()> {
        self.memory.release_cached()
    }

    pub fn stage_status(&self) -> (StageStatus, StageStatus) {
        (self.prior.status(), self.decoder.status())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ServiceState::Ready => Ok(()),
            state => Err(CascadeError::ServiceError(format!(
                "service is not ready ({:?})",
                state
            ))),
        }
    }
}
