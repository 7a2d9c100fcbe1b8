//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use std::path::Path;
use tracing::info;

use grid_store::{
    build_query, ConfigRegistry, DomainRegistry, GridRecord, GridStore, Metadata, ParamStore,
    StoreConfig,
};
use rainfields_common::{parse_utc, Domain, RawGridKey, RecordKind, TimeRange};

use crate::{Command, ConfigCommand, DomainCommand};

pub async fn run(command: Command, config: &StoreConfig) -> Result<()> {
    let store = GridStore::connect(config).await?;

    match command {
        Command::Init => {
            store.ensure_indexes().await?;
            info!("Storage initialised");
        }
        Command::Domain(cmd) => domain(cmd, DomainRegistry::new(store.documents())).await?,
        Command::Config(cmd) => configuration(cmd, ConfigRegistry::new(store.documents())).await?,
        Command::Put {
            key,
            kind,
            file,
            metadata,
        } => {
            let metadata = parse_metadata(&metadata)?;
            let record = if kind.carries_blob() {
                let Some(file) = file else {
                    bail!("{} records need --file", kind);
                };
                let payload = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("reading {}", file.display()))?;
                store
                    .put(key, kind, Some(Bytes::from(payload)), metadata)
                    .await?
            } else {
                params(&store, config).put(key, kind, metadata).await?
            };
            print_record(&record)?;
        }
        Command::Get { key, kind, output } => {
            let found = if kind.carries_blob() {
                store.get(key, kind).await?
            } else {
                params(&store, config).get(key, kind).await?
            };
            let Some(record) = found else {
                bail!("not found");
            };
            if let (Some(path), Some(payload)) = (&output, &record.payload) {
                tokio::fs::write(path, payload)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                info!(path = %path.display(), size = payload.len(), "Wrote payload");
            }
            print_record(&record)?;
        }
        Command::Ls {
            domain,
            product,
            kind,
            valid,
            analyses,
            desc,
            limit,
        } => {
            let mut query = build_query(RawGridKey {
                domain,
                product,
                ..RawGridKey::default()
            })?;
            if let Some(range) = valid {
                let range = TimeRange::parse(&range).context("parsing --valid")?;
                query = query.valid_between(range.start, range.end);
            }
            if analyses {
                query = query.analyses_only();
            }
            if desc {
                query = query.descending();
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }

            let mut records = store.find(query, kind);
            while let Some(record) = records.try_next().await? {
                println!(
                    "{}\t{}",
                    record.key,
                    record.artifact_name.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Rm { key, kind } => {
            let deleted = if kind.carries_blob() {
                store.delete(key, kind).await?
            } else {
                params(&store, config).delete(key, kind).await?
            };
            println!("{}", if deleted { "deleted" } else { "not found" });
        }
        Command::LatestBase {
            domain,
            product,
            valid_time,
        } => {
            let valid_time = parse_utc(&valid_time).context("parsing --valid-time")?;
            match store.latest_base_time(&domain, &product, valid_time).await? {
                Some(base) => println!("{}", base.to_rfc3339()),
                None => println!("none"),
            }
        }
    }

    Ok(())
}

async fn domain(cmd: DomainCommand, registry: DomainRegistry) -> Result<()> {
    match cmd {
        DomainCommand::Put { file } => {
            let domain: Domain = serde_yaml::from_str(&read_text(&file).await?)
                .with_context(|| format!("parsing {}", file.display()))?;
            registry.put_domain(&domain).await?;
            println!("{}", domain.id);
        }
        DomainCommand::Get { id } => match registry.get_domain(&id).await? {
            Some(domain) => println!("{}", serde_json::to_string_pretty(&domain)?),
            None => bail!("domain {} not found", id),
        },
        DomainCommand::List => {
            for domain in registry.list_domains().await? {
                let extent = domain.geometry.extent();
                println!(
                    "{}\t{}x{}\t{}\t{:.0},{:.0},{:.0},{:.0}",
                    domain.id,
                    domain.geometry.n_cols,
                    domain.geometry.n_rows,
                    domain.crs.epsg,
                    extent.min_x,
                    extent.min_y,
                    extent.max_x,
                    extent.max_y
                );
            }
        }
    }
    Ok(())
}

async fn configuration(cmd: ConfigCommand, registry: ConfigRegistry) -> Result<()> {
    match cmd {
        ConfigCommand::Write { name, file } => {
            let value: serde_json::Value = serde_yaml::from_str(&read_text(&file).await?)
                .with_context(|| format!("parsing {}", file.display()))?;
            registry.write_config(&name, &value).await?;
        }
        ConfigCommand::Get { name } => match registry.get_config(&name).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("configuration {} not found", name),
        },
        ConfigCommand::List => {
            for name in registry.list_configs().await? {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

fn params(store: &GridStore, config: &StoreConfig) -> ParamStore {
    ParamStore::new(store.documents())
        .with_conflict_policy(config.conflict_policy)
        .with_page_size(config.page_size)
}

fn parse_metadata(text: &str) -> Result<Metadata> {
    match serde_json::from_str::<serde_json::Value>(text).context("parsing --metadata")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("--metadata must be a JSON object"),
    }
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

fn print_record(record: &GridRecord) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}
