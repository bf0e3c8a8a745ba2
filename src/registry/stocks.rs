//! Stock registry.
//!
//! Records every stock-table column by stock name. A stock held by more than
//! one column is shared: the first column in circuit order integrates it
//! from the flows of all of them, the rest follow its level.

use std::collections::BTreeMap;

use crate::circuit::ElementId;

/// One column holding a stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockSite {
    pub table: ElementId,
    pub column: usize,
}

/// Where each stock lives, rebuilt on every topology analysis.
#[derive(Debug, Clone, Default)]
pub struct StockRegistry {
    sites: BTreeMap<String, Vec<StockSite>>,
}

impl StockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `column` of `table` holds `stock`. Blank names are ignored.
    pub fn register(&mut self, stock: &str, table: ElementId, column: usize) {
        if stock.trim().is_empty() {
            return;
        }
        let site = StockSite { table, column };
        let sites = self.sites.entry(stock.to_string()).or_default();
        if !sites.contains(&site) {
            sites.push(site);
        }
    }

    pub fn clear(&mut self) {
        self.sites.clear();
    }

    pub fn sites(&self, stock: &str) -> &[StockSite] {
        self.sites.get(stock).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The column that integrates `stock`.
    pub fn master(&self, stock: &str) -> Option<StockSite> {
        self.sites(stock).first().copied()
    }

    /// Distinct tables holding `stock`, in circuit order.
    pub fn tables_for(&self, stock: &str) -> Vec<ElementId> {
        let mut tables: Vec<ElementId> = Vec::new();
        for site in self.sites(stock) {
            if !tables.contains(&site.table) {
                tables.push(site.table);
            }
        }
        tables
    }

    pub fn is_stock(&self, name: &str) -> bool {
        self.sites.contains_key(name)
    }

    pub fn is_shared(&self, stock: &str) -> bool {
        self.sites(stock).len() > 1
    }

    /// Sorted names of stocks held by more than one column.
    pub fn shared_stocks(&self) -> Vec<&str> {
        self.sites
            .iter()
            .filter(|(_, sites)| sites.len() > 1)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Sorted names of every stock.
    pub fn stock_names(&self) -> Vec<&str> {
        self.sites.keys().map(String::as_str).collect()
    }
}
