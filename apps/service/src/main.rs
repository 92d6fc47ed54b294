mod cli;
mod config;
mod database;
mod notifier;
mod pool;
mod retention;
mod service;

use anyhow::{Result, bail};
use clap::Parser;
use knocker::SiteId;
use knocker::validation::validate_site;

use crate::cli::{Cli, Command, SitesAction};
use crate::config::Config;
use crate::service::Service;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;
    logger::init_tracing_with_level(&config.log.level);

    match cli.command {
        Command::Config => {
            print!("{config}");
            Ok(())
        }
        Command::Run { muted } => {
            let service = Service::new(config).await?;
            service.notifier().set_muted(muted);
            service.run().await
        }
        Command::Check { id } => {
            let service = Service::new(config).await?;
            let report = service.check(SiteId(id)).await?;
            println!("site {id}: {} ({} ms)", report.outcome, report.latency_ms);
            Ok(())
        }
        Command::Sites { action } => sites(Service::new(config).await?, action).await,
    }
}

async fn sites(service: Service, action: SitesAction) -> Result<()> {
    let repository = service.repository();

    match action {
        SitesAction::Add(add) => {
            let site = add.into_site();
            validate_site(&site).to_result()?;
            let id = repository.insert_site(&site).await?;
            println!("added site {id}");
        }
        SitesAction::List { tag, json } => {
            let sites: Vec<_> = repository
                .list_sites()
                .await?
                .into_iter()
                .filter(|site| tag.is_empty() || site.has_any_tag(&tag))
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&sites)?);
                return Ok(());
            }
            for site in sites {
                let status = site
                    .last_result
                    .as_ref()
                    .map_or_else(|| "waiting".to_string(), |last| last.status.to_string());
                let state = if site.disabled { "disabled" } else { status.as_str() };
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    site.id, state, site.validation_mode, site.name, site.url, site.tags
                );
            }
        }
        SitesAction::Remove { id } => {
            if !repository.delete_site(SiteId(id)).await? {
                bail!("site {id} not found");
            }
            println!("removed site {id}");
        }
        SitesAction::Enable { id } => {
            if !repository.set_disabled(SiteId(id), false).await? {
                bail!("site {id} not found");
            }
            println!("enabled site {id}");
        }
        SitesAction::Disable { id } => {
            if !repository.set_disabled(SiteId(id), true).await? {
                bail!("site {id} not found");
            }
            println!("disabled site {id}");
        }
        SitesAction::History { id, limit, json } => {
            let results = repository.recent_results(SiteId(id), limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }
            for result in results {
                println!("{}\t{}", result.timestamp.to_rfc3339(), result.outcome);
            }
        }
    }

    Ok(())
}
