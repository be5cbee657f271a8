//! CSV flat-file store.

use super::GraphStore;
use crate::error::{Result, WatchError};
use crate::graph::{ChannelId, Registry, SubscriberId, TenantId};
use crate::monitor::MonitorKind;
use csv::{ReaderBuilder, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TENANTS: &str = "tenants";
const CHANNELS: &str = "channels";
const RESOURCES: &str = "resources";
const SUBSCRIBERS: &str = "subscribers";
const SUBSCRIPTIONS: &str = "subscriptions";

const CURRENT: &str = "CURRENT";
const GENERATION_PREFIX: &str = "tables-";

#[derive(Debug, Serialize, Deserialize)]
struct TenantRow {
    tenant_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelRow {
    channel_id: u64,
    tenant_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResourceRow {
    url: String,
    name: String,
    channel_id: u64,
    monitor: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubscriberRow {
    subscriber_id: u64,
    tenant_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubscriptionRow {
    subscriber_id: u64,
    url: String,
}

/// Stores the graph as CSV tables under one directory.
///
/// Layout:
///
/// ```text
/// <root>/CURRENT                       name of the committed generation
/// <root>/tables-<n>/tenants.csv        tenant_id
/// <root>/tables-<n>/channels.csv       channel_id, tenant_id
/// <root>/tables-<n>/resources.csv      url, name, channel_id, monitor
/// <root>/tables-<n>/subscribers.csv    subscriber_id, tenant_id
/// <root>/tables-<n>/subscriptions.csv  subscriber_id, url
/// <root>/tables-<n>/monitors/<kind>.csv url, <kind's own columns...>
/// <root>/cache/...                     monitors' cached content
/// ```
///
/// Every save writes a complete new generation, then switches `CURRENT` to it
/// with a single rename. A save that fails or is interrupted leaves the
/// previous generation in place, so a load always sees one consistent set of
/// tables. Generations other than the committed one are deleted after each
/// successful save.
///
/// Fields are quoted per RFC 4180, so commas, quotes and newlines inside page
/// content survive a round trip.
///
/// # Examples
///
/// ```rust,no_run
/// use sitewatch::store::{CsvStore, GraphStore};
///
/// # fn example() -> sitewatch::error::Result<()> {
/// let store = CsvStore::new("data");
/// let registry = store.load()?;
/// store.save(&registry)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CsvStore {
    root: PathBuf,
}

impl CsvStore {
    /// Create a store rooted at `root`. Nothing is touched until load/save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where monitors keep cached content.
    pub fn cache_root(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Directory of the committed tables, or `None` before the first save.
    ///
    /// # Errors
    ///
    /// Returns an error if `CURRENT` cannot be read or names no generation.
    pub fn tables_dir(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .current_generation()?
            .map(|generation| self.generation_dir(generation)))
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.root.join(format!("{}{}", GENERATION_PREFIX, generation))
    }

    fn current_generation(&self) -> Result<Option<u64>> {
        let text = match fs::read_to_string(self.root.join(CURRENT)) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let name = text.trim();
        parse_generation(name).map(Some).ok_or_else(|| {
            WatchError::malformed(CURRENT, 1, format!("not a table generation: '{}'", name))
        })
    }

    /// Point `CURRENT` at `generation`. The rename is the commit.
    fn commit(&self, generation: u64) -> Result<()> {
        let pointer = self.root.join(CURRENT);
        let staged = pointer.with_extension("tmp");

        let written = File::create(&staged).and_then(|mut file| {
            writeln!(file, "{}{}", GENERATION_PREFIX, generation)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&staged, &pointer)) {
            if let Err(cleanup) = fs::remove_file(&staged) {
                debug!(path = %staged.display(), error = %cleanup, "no staged pointer to remove");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Delete every generation except `keep`.
    fn prune(&self, keep: u64) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "cannot list old table generations");
                return;
            }
        };
        for entry in entries.flatten() {
            let stale = entry
                .file_name()
                .to_str()
                .and_then(parse_generation)
                .is_some_and(|generation| generation != keep);
            if stale {
                discard(&entry.path());
            }
        }
    }
}

impl GraphStore for CsvStore {
    fn load(&self) -> Result<Registry> {
        let mut registry = Registry::new(self.cache_root());

        let Some(dir) = self.tables_dir()? else {
            info!(root = %self.root.display(), "no saved graph, starting empty");
            return Ok(registry);
        };

        load_tenants(&dir, &mut registry)?;
        load_channels(&dir, &mut registry)?;
        load_resources(&dir, &mut registry)?;
        load_subscribers(&dir, &mut registry)?;
        hydrate_monitors(&dir, &mut registry)?;

        info!(
            root = %self.root.display(),
            tables = %dir.display(),
            tenants = registry.tenants().count(),
            resources = registry.watched_count(),
            "graph loaded"
        );
        Ok(registry)
    }

    fn save(&self, registry: &Registry) -> Result<()> {
        let generation = self.current_generation()?.map_or(1, |current| current + 1);
        let staging = self.generation_dir(generation);

        if let Err(e) = write_tables(&staging, registry).and_then(|()| self.commit(generation)) {
            discard(&staging);
            return Err(e);
        }
        self.prune(generation);

        debug!(
            root = %self.root.display(),
            generation,
            resources = registry.watched_count(),
            "graph saved"
        );
        Ok(())
    }

    fn name(&self) -> String {
        format!("csv:{}", self.root.display())
    }
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

fn discard(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "cannot remove table generation"),
    }
}

fn table_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}.csv", table))
}

fn monitor_table(kind: MonitorKind) -> String {
    format!("monitors/{}", kind.tag())
}

fn load_tenants(dir: &Path, registry: &mut Registry) -> Result<()> {
    for (row, record) in read_rows::<TenantRow>(&table_path(dir, TENANTS), TENANTS)? {
        if !registry.provision_tenant(TenantId(record.tenant_id)) {
            return Err(WatchError::malformed(
                TENANTS,
                row,
                format!("duplicate tenant {}", record.tenant_id),
            ));
        }
    }
    Ok(())
}

fn load_channels(dir: &Path, registry: &mut Registry) -> Result<()> {
    for (row, record) in read_rows::<ChannelRow>(&table_path(dir, CHANNELS), CHANNELS)? {
        let channel = ChannelId(record.channel_id);
        if registry.channel(channel).is_some() {
            return Err(WatchError::malformed(
                CHANNELS,
                row,
                format!("duplicate channel {}", channel),
            ));
        }
        registry
            .ensure_channel(TenantId(record.tenant_id), channel)
            .map_err(|e| WatchError::malformed(CHANNELS, row, e.to_string()))?;
    }
    Ok(())
}

fn load_resources(dir: &Path, registry: &mut Registry) -> Result<()> {
    for (row, record) in read_rows::<ResourceRow>(&table_path(dir, RESOURCES), RESOURCES)? {
        let kind = MonitorKind::from_tag(&record.monitor).ok_or_else(|| {
            WatchError::malformed(
                RESOURCES,
                row,
                format!("unknown monitor kind '{}'", record.monitor),
            )
        })?;
        let channel = ChannelId(record.channel_id);
        let tenant = registry.channel(channel).map(|c| c.tenant()).ok_or_else(|| {
            WatchError::malformed(RESOURCES, row, format!("unknown channel {}", channel))
        })?;

        registry
            .add_watched_resource_with(tenant, channel, &record.name, &record.url, kind)
            .map_err(|e| WatchError::malformed(RESOURCES, row, e.to_string()))?;
    }
    Ok(())
}

fn load_subscribers(dir: &Path, registry: &mut Registry) -> Result<()> {
    let path = table_path(dir, SUBSCRIBERS);
    for (row, record) in read_rows::<SubscriberRow>(&path, SUBSCRIBERS)? {
        registry
            .register_subscriber(TenantId(record.tenant_id), SubscriberId(record.subscriber_id))
            .map_err(|e| WatchError::malformed(SUBSCRIBERS, row, e.to_string()))?;
    }

    let path = table_path(dir, SUBSCRIPTIONS);
    for (row, record) in read_rows::<SubscriptionRow>(&path, SUBSCRIPTIONS)? {
        registry
            .link_registered(SubscriberId(record.subscriber_id), &record.url)
            .map_err(|reason| WatchError::malformed(SUBSCRIPTIONS, row, reason))?;
    }
    Ok(())
}

/// Second phase: overwrite each fresh monitor with its persisted state.
fn hydrate_monitors(dir: &Path, registry: &mut Registry) -> Result<()> {
    for kind in MonitorKind::ALL {
        let table = monitor_table(kind);
        let mut records = read_monitor_rows(&table_path(dir, &table), &table)?;

        let urls: Vec<String> = registry
            .resources()
            .filter(|resource| resource.monitor().kind() == kind)
            .map(|resource| resource.url().to_string())
            .collect();

        for url in urls {
            let Some((row, fields)) = records.remove(&url) else {
                warn!(url = %url, kind = %kind, "no persisted monitor state, using defaults");
                continue;
            };
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            if let Some(resource) = registry.resource_mut(&url) {
                resource
                    .monitor_mut()
                    .deserialize(&fields)
                    .map_err(|reason| WatchError::malformed(table.as_str(), row, reason))?;
            }
        }

        if let Some((url, (row, _))) = records.into_iter().min_by_key(|(_, (row, _))| *row) {
            return Err(WatchError::malformed(
                table,
                row,
                format!("unknown resource url '{}'", url),
            ));
        }
    }
    Ok(())
}

/// Write every table of `registry` into a fresh `dir`.
fn write_tables(dir: &Path, registry: &Registry) -> Result<()> {
    // Left over from an interrupted save.
    discard(dir);
    fs::create_dir_all(dir.join("monitors"))?;

    let tenants: Vec<TenantRow> = registry
        .tenants()
        .map(|tenant| TenantRow {
            tenant_id: tenant.id().0,
        })
        .collect();
    write_table(&table_path(dir, TENANTS), &["tenant_id"], &tenants)?;

    let channels: Vec<ChannelRow> = registry
        .channels()
        .map(|channel| ChannelRow {
            channel_id: channel.id().0,
            tenant_id: channel.tenant().0,
        })
        .collect();
    write_table(&table_path(dir, CHANNELS), &["channel_id", "tenant_id"], &channels)?;

    let resources: Vec<ResourceRow> = registry
        .resources()
        .map(|resource| ResourceRow {
            url: resource.url().to_string(),
            name: resource.name().to_string(),
            channel_id: resource.channel().0,
            monitor: resource.monitor().kind().tag().to_string(),
        })
        .collect();
    write_table(
        &table_path(dir, RESOURCES),
        &["url", "name", "channel_id", "monitor"],
        &resources,
    )?;

    let subscribers: Vec<SubscriberRow> = registry
        .tenants()
        .flat_map(|tenant| tenant.subscribers())
        .map(|subscriber| SubscriberRow {
            subscriber_id: subscriber.id().0,
            tenant_id: subscriber.tenant().0,
        })
        .collect();
    write_table(
        &table_path(dir, SUBSCRIBERS),
        &["subscriber_id", "tenant_id"],
        &subscribers,
    )?;

    let subscriptions: Vec<SubscriptionRow> = registry
        .tenants()
        .flat_map(|tenant| tenant.subscribers())
        .flat_map(|subscriber| {
            subscriber.follows().map(move |url| SubscriptionRow {
                subscriber_id: subscriber.id().0,
                url: url.to_string(),
            })
        })
        .collect();
    write_table(
        &table_path(dir, SUBSCRIPTIONS),
        &["subscriber_id", "url"],
        &subscriptions,
    )?;

    for kind in MonitorKind::ALL {
        let rows: Vec<Vec<String>> = registry
            .resources()
            .filter(|resource| resource.monitor().kind() == kind)
            .map(|resource| {
                let mut row = vec![resource.url().to_string()];
                row.extend(resource.monitor().serialize());
                row
            })
            .collect();
        let mut header = vec!["url"];
        header.extend_from_slice(kind.columns());
        write_records(&table_path(dir, &monitor_table(kind)), &header, &rows)?;
    }
    Ok(())
}

/// Write a typed table and sync it to disk.
fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    sync(writer)
}

/// Write an untyped table and sync it to disk.
fn write_records(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    sync(writer)
}

fn sync(writer: csv::Writer<File>) -> Result<()> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Read a typed table, numbering data rows from 1.
fn read_rows<T: DeserializeOwned>(path: &Path, table: &str) -> Result<Vec<(usize, T)>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    reader
        .deserialize::<T>()
        .enumerate()
        .map(|(index, record)| {
            record
                .map(|record| (index + 1, record))
                .map_err(|e| WatchError::malformed(table, index + 1, e.to_string()))
        })
        .collect()
}

/// Read a monitor table into `url -> (row, fields after the url)`.
///
/// A missing table reads as empty; each resource then falls back to defaults.
fn read_monitor_rows(path: &Path, table: &str) -> Result<HashMap<String, (usize, Vec<String>)>> {
    let mut reader = match ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
    {
        Ok(reader) => reader,
        Err(e) => {
            let missing = matches!(
                e.kind(),
                csv::ErrorKind::Io(source) if source.kind() == io::ErrorKind::NotFound
            );
            if !missing {
                return Err(e.into());
            }
            warn!(table, "monitor table missing");
            return Ok(HashMap::new());
        }
    };

    let mut records = HashMap::new();
    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        let record = record.map_err(|e| WatchError::malformed(table, row, e.to_string()))?;
        let mut fields = record.iter();
        let url = fields
            .next()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| WatchError::malformed(table, row, "missing url"))?
            .to_string();
        let rest: Vec<String> = fields.map(str::to_string).collect();
        if records.insert(url.clone(), (row, rest)).is_some() {
            return Err(WatchError::malformed(
                table,
                row,
                format!("duplicate record for '{}'", url),
            ));
        }
    }
    Ok(records)
}
