//! The built-in analyzers and their registration order.

mod call_graph;
mod callbacks;
mod htable;
mod imports;
mod pv;
mod statistics;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::analysis::{CallGraph, Dispatcher, ImportTable, RegistrationError, VariableIndex};
use crate::config::Config;

pub use call_graph::CallGraphAnalyzer;
pub use callbacks::CallbackAnalyzer;
pub use htable::HtableAnalyzer;
pub use imports::ImportAnalyzer;
pub use pv::PvAnalyzer;
pub use statistics::StatisticsAnalyzer;

/// State one analyzer owns and later analyzers read.
pub type Shared<T> = Arc<RwLock<T>>;

/// Read handles onto the cross-file stores, for callers outside the dispatcher.
#[derive(Clone)]
pub struct AnalyzerHandles {
    pub imports: Shared<ImportTable>,
    pub call_graph: Shared<CallGraph>,
    pub pv_indexes: Shared<HashMap<String, VariableIndex>>,
}

/// Register the default analyzers. Dependencies come first: the call graph
/// needs resolved imports, the PV and callback analyzers need the call graph.
pub fn register_defaults(
    dispatcher: &mut Dispatcher,
    config: &Config,
) -> Result<AnalyzerHandles, RegistrationError> {
    let imports = ImportAnalyzer::new();
    let import_table = imports.table();
    dispatcher.register(Box::new(imports))?;

    let call_graph = CallGraphAnalyzer::new(Arc::clone(&import_table));
    let graph = call_graph.graph();
    dispatcher.register(Box::new(call_graph))?;

    let pv = PvAnalyzer::new(Arc::clone(&graph));
    let pv_indexes = pv.indexes();
    dispatcher.register(Box::new(pv))?;

    dispatcher.register(Box::new(CallbackAnalyzer::new(Arc::clone(&graph))))?;
    dispatcher.register(Box::new(HtableAnalyzer::new(&config.declared_htables)))?;
    dispatcher.register(Box::new(StatisticsAnalyzer::new(&config.declared_statistics)))?;

    Ok(AnalyzerHandles {
        imports: import_table,
        call_graph: graph,
        pv_indexes,
    })
}
