//! Mapping from API entity names to the database tables that back them.

use std::sync::LazyLock;

use regex::Regex;

/// A table backing one API entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub entity: &'static str,
    pub table: &'static str,
    /// Stored in the agenda's document database rather than the agenda itself.
    pub doc_db: bool,
}

const fn entry(entity: &'static str, table: &'static str, doc_db: bool) -> TableEntry {
    TableEntry {
        entity,
        table,
        doc_db,
    }
}

pub const TABLES: &[TableEntry] = &[
    entry("Activity", "Adresar_Aktivita", false),
    entry("Article", "Artikly_Artikl", false),
    entry("Attachment", "System_Attachment", true),
    entry("BankStatement", "Finance_BankovniVypis", false),
    entry("Centre", "Ciselniky_Stredisko", false),
    entry("Company", "Adresar_Firma", false),
    entry("Connection", "Adresar_Spojeni", false),
    entry("IssuedInvoice", "Fakturace_FakturaVydana", false),
    entry("IssuedOrder", "Objednavky_ObjednavkaVydana", false),
    entry("JobOrder", "Ciselniky_Zakazka", false),
    entry("Operation", "Ciselniky_Cinnost", false),
    entry("Person", "Adresar_Osoba", false),
    entry("PrepaymentInvoice", "Fakturace_ZalohovaFakturaPrijata", false),
    entry("PrepaymentIssuedInvoice", "Fakturace_ZalohovaFakturaVydana", false),
    entry("ReceivedInvoice", "Fakturace_FakturaPrijata", false),
    entry("ReceivedOrder", "Objednavky_ObjednavkaPrijata", false),
    entry("Staff", "Personalistika_Zamestnanec", false),
    entry("TypeOfActivity", "Adresar_TypAktivity", false),
];

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[A-Z][a-z]+").expect("invalid entity regex"));

pub fn table_for_entity(entity: &str) -> Option<&'static TableEntry> {
    TABLES.iter().find(|t| t.entity == entity)
}

/// Whether `table` lives in the document database. Unknown tables do not.
pub fn is_doc_table(table: &str) -> bool {
    TABLES.iter().any(|t| t.table == table && t.doc_db)
}

/// The entity segment of a request URL: the first path segment containing a
/// capitalised word. Scheme, authority and query string are not searched.
pub fn entity_from_url(url: &str) -> Option<&str> {
    let path = match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            rest.find('/').map_or("", |j| &rest[j..])
        }
        None => url,
    };
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.split('/').find(|seg| ENTITY_RE.is_match(seg))
}

/// Resolve a request URL to the table backing its entity.
pub fn table_from_url(url: &str) -> Option<&'static TableEntry> {
    entity_from_url(url).and_then(table_for_entity)
}
