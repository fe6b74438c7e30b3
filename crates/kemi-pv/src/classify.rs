//! Static classification of pseudo-variable classes.
//!
//! Every class known to the analyzer lives in exactly one table. A class outside
//! all tables is reported as unknown and falls into [`PvCategory::Other`].

use derive_more::Display;

/// Broad family a pseudo-variable class belongs to.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PvCategory {
    #[display("URI")]
    Uri,
    #[display("network")]
    Network,
    #[display("message")]
    Message,
    #[display("time")]
    Time,
    #[display("transaction")]
    Transaction,
    #[display("header")]
    Header,
    #[display("script variable")]
    ScriptVariable,
    #[display("shared variable")]
    SharedVariable,
    #[display("hash table")]
    HashTable,
    #[display("dialog variable")]
    DialogVariable,
    #[display("other")]
    Other,
}

impl PvCategory {
    /// Whether scripts assign values to classes of this category.
    ///
    /// Only these categories take part in "read but never written" checks.
    /// Hash tables are writable too but are validated per table name.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            PvCategory::ScriptVariable | PvCategory::SharedVariable | PvCategory::DialogVariable
        )
    }

    /// Whether the value is provided by the runtime rather than the script.
    pub fn is_builtin(self) -> bool {
        !self.is_writable() && self != PvCategory::HashTable
    }
}

const URI: &[&str] = &[
    "ru", "rU", "rd", "rp", "rP", "rz", "rt", "du", "fu", "fU", "fd", "fn", "ft", "tu", "tU", "td",
    "tn", "tt", "ou", "oU", "od", "op", "oP", "ruid", "ai", "adu", "pu", "pU", "pd", "pn", "re",
];

const NETWORK: &[&str] = &[
    "si", "sp", "sP", "Ri", "Rp", "RAi", "RAp", "Rn", "pr", "proto", "snd", "sndfrom", "sndto",
    "rcv", "sas", "conid",
];

const MESSAGE: &[&str] = &[
    "rm", "rmid", "rs", "rr", "rb", "rv", "mb", "mbu", "ml", "mi", "mt", "ms", "mf", "mF", "ci",
    "cs", "ct", "ctu", "cT", "cl", "ua", "bs", "bR", "br", "bS", "bf", "bF", "sf", "sF", "ds",
    "hu",
];

const TIME: &[&str] = &["Ts", "TS", "Tf", "TF", "Tb", "TV", "time", "timef", "utimef"];

const TRANSACTION: &[&str] = &[
    "T",
    "T_branch_idx",
    "T_reply_code",
    "T_reply_reason",
    "T_reply_last",
    "T_req",
    "T_rpl",
    "T_inv",
    "tm",
];

const HEADER: &[&str] = &["hdr", "hdrc", "hdrcb", "hfl", "hflc"];

const SCRIPT_VARIABLE: &[&str] = &["var", "vz", "vn", "avp", "xavp", "xavu", "xavi"];

const SHARED_VARIABLE: &[&str] = &["shv"];

const HASH_TABLE: &[&str] = &[
    "sht",
    "shtex",
    "shtcn",
    "shtcv",
    "shtinc",
    "shtdec",
    "shtitkey",
    "shtitval",
    "shtrecord",
];

const DIALOG_VARIABLE: &[&str] = &["dlg_var", "dlg", "dlg_ctx"];

const OTHER_KNOWN: &[&str] = &[
    "stat", "sel", "env", "envn", "def", "defn", "rand", "sruid", "cfg", "nh", "null", "via0",
    "via1", "msrp", "http_req", "tcp", "ltt",
];

const TABLES: &[(PvCategory, &[&str])] = &[
    (PvCategory::Uri, URI),
    (PvCategory::Network, NETWORK),
    (PvCategory::Message, MESSAGE),
    (PvCategory::Time, TIME),
    (PvCategory::Transaction, TRANSACTION),
    (PvCategory::Header, HEADER),
    (PvCategory::ScriptVariable, SCRIPT_VARIABLE),
    (PvCategory::SharedVariable, SHARED_VARIABLE),
    (PvCategory::HashTable, HASH_TABLE),
    (PvCategory::DialogVariable, DIALOG_VARIABLE),
    (PvCategory::Other, OTHER_KNOWN),
];

fn lookup(class: &str) -> Option<PvCategory> {
    TABLES
        .iter()
        .find(|(_, names)| names.contains(&class))
        .map(|(category, _)| *category)
}

/// Category of a class name. Unknown classes map to [`PvCategory::Other`].
pub fn category_of(class: &str) -> PvCategory {
    lookup(class).unwrap_or(PvCategory::Other)
}

/// Whether the class appears in any classification table.
pub fn is_known_class(class: &str) -> bool {
    lookup(class).is_some()
}

/// All known classes with their categories, in table order.
pub fn known_classes() -> impl Iterator<Item = (&'static str, PvCategory)> {
    TABLES
        .iter()
        .flat_map(|(category, names)| names.iter().map(move |name| (*name, *category)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_disjoint() {
        let mut seen = std::collections::HashSet::new();
        for (name, _) in known_classes() {
            assert!(seen.insert(name), "{name} listed twice");
        }
    }

    #[test]
    fn test_category_lookup() {
        assert_eq!(category_of("var"), PvCategory::ScriptVariable);
        assert_eq!(category_of("shv"), PvCategory::SharedVariable);
        assert_eq!(category_of("sht"), PvCategory::HashTable);
        assert_eq!(category_of("ru"), PvCategory::Uri);
        assert_eq!(category_of("T_reply_code"), PvCategory::Transaction);
        assert_eq!(category_of("nonsense"), PvCategory::Other);
    }

    #[test]
    fn test_known_class() {
        assert!(is_known_class("stat"));
        assert!(!is_known_class("nonsense"));
    }

    #[test]
    fn test_writable_categories() {
        assert!(PvCategory::ScriptVariable.is_writable());
        assert!(PvCategory::DialogVariable.is_writable());
        assert!(!PvCategory::HashTable.is_writable());
        assert!(!PvCategory::Uri.is_writable());
        assert!(PvCategory::Uri.is_builtin());
        assert!(!PvCategory::HashTable.is_builtin());
    }
}
