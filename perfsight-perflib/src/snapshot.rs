//! Object names in, decoded snapshot out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::Snapshot;
use crate::names::NameIndexTable;
use crate::parser::parse_block;
use crate::reader::{Query, RawSnapshotReader};

/// Snapshot engine over a raw reader and the process-wide name tables.
#[derive(Clone)]
pub struct Perflib {
    names: Arc<NameIndexTable>,
    help: Option<Arc<NameIndexTable>>,
    reader: Arc<dyn RawSnapshotReader>,
}

impl std::fmt::Debug for Perflib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Perflib")
            .field("names", &self.names.len())
            .field("help", &self.help.as_ref().map(|h| h.len()))
            .finish_non_exhaustive()
    }
}

impl Perflib {
    pub fn new(
        names: Arc<NameIndexTable>,
        help: Option<Arc<NameIndexTable>>,
        reader: Arc<dyn RawSnapshotReader>,
    ) -> Self {
        Self {
            names,
            help,
            reader,
        }
    }

    /// Load the name tables from `reader` once and keep them for the
    /// lifetime of the engine.
    ///
    /// A missing help table is not fatal; help strings are then left empty.
    pub fn from_reader(reader: Arc<dyn RawSnapshotReader>) -> Result<Self> {
        let names = reader.name_table()?;
        let help = match reader.help_table() {
            Ok(help) if !help.is_empty() => Some(Arc::new(help)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load counter help table");
                None
            }
        };

        info!(
            names = names.len(),
            help = help.as_ref().map_or(0, |h| h.len()),
            "Loaded performance counter name tables"
        );

        Ok(Self::new(Arc::new(names), help, reader))
    }

    pub fn names(&self) -> &Arc<NameIndexTable> {
        &self.names
    }

    /// Resolve object names to an index query.
    ///
    /// Names unknown to this system are skipped; duplicates are collapsed.
    pub fn query_for<S: AsRef<str>>(&self, object_names: &[S]) -> Query {
        let mut indices = Vec::with_capacity(object_names.len());
        for name in object_names {
            let name = name.as_ref();
            match self.names.lookup_index(name) {
                Some(index) if !indices.contains(&index) => indices.push(index),
                Some(_) => {}
                None => warn!(object = name, "Performance object not available on this system"),
            }
        }
        Query::Indices(indices)
    }

    /// Take a snapshot of the named objects.
    ///
    /// Objects that failed to decode are listed in [`Snapshot::errors`];
    /// only a block that cannot be read at all fails the call.
    pub fn snapshot<S: AsRef<str>>(&self, object_names: &[S]) -> Result<Snapshot> {
        let query = self.query_for(object_names);
        if query.is_empty() {
            debug!("No resolvable objects requested, returning empty snapshot");
            return Ok(Snapshot::empty());
        }

        let data = self.reader.fetch(&query)?;
        let block = parse_block(&data, &self.names, self.help.as_deref())?;
        let snapshot = Snapshot::from_block(block);

        debug!(
            query = %query.as_value_name(),
            bytes = data.len(),
            objects = snapshot.len(),
            errors = snapshot.errors.len(),
            "Took performance snapshot"
        );

        Ok(snapshot)
    }
}
