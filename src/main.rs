use rcascade::logger;
use rcascade::{CascadeService, Config};

#[cfg(not(feature = "server"))]
use rcascade::{GenerationOrchestrator, GenerationRequest, OutputPersister, SeedController};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let config = Config::from_env();
    logger::init_with_config(config.logger_config())?;
    logger::log_startup_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    if !dotenv_loaded {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let mut service = match CascadeService::synthetic(&config) {
        Ok(service) => service,
        Err(e) => {
            log::error!("❌ Failed to build cascade service: {}", e);
            return Err(e.into());
        }
    };
    service.init()?;
    logger::log_config_info(&config, service.plan());

    #[cfg(feature = "server")]
    {
        rcascade::server::serve(&config, service).await?;
    }

    #[cfg(not(feature = "server"))]
    {
        let prompt = std::env::args()
            .nth(1)
            .unwrap_or_else(|| "a red cube".to_string());
        let request = GenerationRequest::new(prompt);
        request.validate()?;

        let result = {
            let mut orchestrator = GenerationOrchestrator::new(
                &service,
                SeedController::new(),
                OutputPersister::new(&config.output_dir),
            );
            orchestrator.run(&request, true)
        };

        match &result {
            Ok(outcome) => {
                for (path, image) in outcome.files.iter().zip(&outcome.images) {
                    log::info!("🖼️  {} (seed {})", path.display(), image.seed);
                }
            }
            Err(e) => log::error!("❌ Generation failed: {}", e),
        }
        service.shutdown()?;
        result?;
    }

    Ok(())
}
