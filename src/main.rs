use anyhow::Context;
use clap::Parser;
use notice_sync::config::cli::{read_json_arg, Command};
use notice_sync::config::toml_config::NoticeSyncConfig;
use notice_sync::core::staging::{
    BatchStageRequest, ConfirmNoticeRequest, RecentQuery, RegisterServerRequest,
    StageNoticeRequest,
};
use notice_sync::domain::ports::NoticeStore;
use notice_sync::utils::error::{ErrorSeverity, NoticeError};
use notice_sync::utils::{logger, validation::Validate};
use notice_sync::{
    BlockchainSync, CliConfig, InMemoryNoticeStore, NoticeService, PgNoticeStore, TronGridClient,
};
use serde_json::Value;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    if cli.log_json {
        logger::init_service_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    match run(&cli).await {
        Ok(Some(output)) => {
            let rendered =
                serde_json::to_string_pretty(&output).context("failed to render command output")?;
            println!("{}", rendered);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(
                "❌ {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());

            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

async fn run(cli: &CliConfig) -> Result<Option<Value>, NoticeError> {
    let config = cli.resolve()?;
    config.validate()?;
    tracing::debug!(
        "Chain endpoint {} / contract {}",
        config.chain.endpoint,
        config.chain.contract_address
    );

    let chain = Arc::new(TronGridClient::new(config.tron_settings())?);

    if cli.dry_run {
        tracing::info!("🧪 Dry run: using an in-memory store");
        execute(InMemoryNoticeStore::new(), chain, &config, &cli.command).await
    } else {
        let store =
            PgNoticeStore::connect(&config.database.url, config.database.max_connections).await?;
        store.init_schema().await?;
        execute(store, chain, &config, &cli.command).await
    }
}

async fn execute<S>(
    store: S,
    chain: Arc<TronGridClient>,
    config: &NoticeSyncConfig,
    command: &Command,
) -> Result<Option<Value>, NoticeError>
where
    S: NoticeStore,
{
    if let Command::Sync { once } = command {
        let mut sync = BlockchainSync::new(store, chain, config.sync_settings());
        if *once {
            let report = sync.tick().await?;
            return Ok(Some(serde_json::to_value(report)?));
        }
        sync.run(shutdown_signal()).await?;
        return Ok(None);
    }

    let service = NoticeService::with_rules(store, chain, config.staging_rules());
    let output = match command {
        Command::Sync { .. } => return Ok(None),
        Command::InitSchema => {
            service.store().init_schema().await?;
            tracing::info!("✅ Schema is up to date");
            serde_json::json!({ "ok": true })
        }
        Command::Stage { payload } => {
            let request: StageNoticeRequest = read_json_arg(payload)?;
            serde_json::to_value(service.stage(&request).await?)?
        }
        Command::Status { id } => serde_json::to_value(service.status(*id).await?)?,
        Command::Confirm { payload } => {
            let request: ConfirmNoticeRequest = read_json_arg(payload)?;
            serde_json::to_value(service.confirm(&request).await?)?
        }
        Command::ValidateAgency { server, agency } => {
            serde_json::to_value(service.validate_agency(server, agency).await?)?
        }
        Command::BatchStage { payload } => {
            let request: BatchStageRequest = read_json_arg(payload)?;
            serde_json::to_value(service.batch_stage(&request).await?)?
        }
        Command::Recent { limit, server } => serde_json::to_value(
            service
                .recent(&RecentQuery {
                    limit: *limit,
                    server_address: server.clone(),
                })
                .await?,
        )?,
        Command::RegisterServer {
            wallet,
            agency,
            display_name,
            inactive,
        } => serde_json::to_value(
            service
                .register_server(&RegisterServerRequest {
                    wallet_address: wallet.clone(),
                    agency: agency.clone(),
                    display_name: display_name.clone(),
                    active: !inactive,
                })
                .await?,
        )?,
        Command::ExpireStale { older_than_hours } => {
            let expired = service
                .expire_stale(chrono::Duration::hours(*older_than_hours as i64))
                .await?;
            serde_json::json!({ "expired": expired })
        }
    };
    Ok(Some(output))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
