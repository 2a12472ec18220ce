//! Display names and valuations for group keys.
//!
//! The core only needs a synchronous lookup; where the reference data comes
//! from is up to the caller. [`Catalog`] is an in-memory implementation built
//! from already-downloaded external texts and a price list.

use std::collections::HashMap;

use crate::item::{GroupKey, ItemKind};

/// Name and monetary value attached to a group key.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    /// Human-readable name.
    pub name: String,
    /// Value of one item, in HC.
    pub value: f64,
}

/// Synchronous lookup of names and valuations.
pub trait Enricher: Send + Sync {
    /// Describe one group. Must not block on I/O.
    fn describe(&self, key: &GroupKey) -> Enrichment;
}

/// Fallback enricher: the class name, valued at zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityEnricher;

impl Enricher for IdentityEnricher {
    fn describe(&self, key: &GroupKey) -> Enrichment {
        Enrichment {
            name: fallback_name(key),
            value: 0.0,
        }
    }
}

/// Display names that differ between the client texts and the price list.
const PRICE_ALIASES: &[(&str, &str)] = &[
    ("Habbo Cola Machine", "Cola Machine"),
    ("Bonnie Blonde's Pillow", "Purple Velvet Pillow"),
    ("Imperial Teleport", "Imperial Teleports"),
    ("poster_5003", "Purple Garland"),
    ("poster_5000", "Green Garland"),
    ("Club sofa", "Club Sofa"),
    ("Dicemaster", "Dice Master"),
];

/// In-memory catalog of external texts and prices.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    texts: HashMap<String, String>,
    prices: HashMap<String, f64>,
}

impl Catalog {
    /// Create an empty catalog. Every lookup falls back to identity names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the client's external texts (`key=value` per line).
    ///
    /// Keys and values are trimmed; lines without `=` are skipped.
    pub fn parse_external_texts(mut self, source: &str) -> Self {
        for line in source.lines() {
            if let Some((key, value)) = line.split_once('=') {
                self.texts
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        self
    }

    /// Register the price of an item by display name.
    pub fn with_price(mut self, name: impl Into<String>, value: f64) -> Self {
        self.prices.insert(name.into(), value);
        self
    }

    /// Register many prices at once.
    pub fn with_prices<I, S>(mut self, prices: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.prices
            .extend(prices.into_iter().map(|(name, value)| (name.into(), value)));
        self
    }

    /// Display name for a group, from the external texts when available.
    pub fn name_of(&self, key: &GroupKey) -> String {
        let text_key = match key.kind {
            ItemKind::Wall => format!("poster_{}_name", key.variant),
            ItemKind::Floor => format!("furni_{}_name", key.class),
        };
        match self.texts.get(&text_key) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => fallback_name(key),
        }
    }

    /// Price of an item by display name; zero when unknown.
    pub fn price_of(&self, name: &str) -> f64 {
        let name = PRICE_ALIASES
            .iter()
            .find(|(from, _)| *from == name)
            .map_or(name, |(_, to)| to);
        self.prices.get(name).copied().unwrap_or(0.0)
    }
}

impl Enricher for Catalog {
    fn describe(&self, key: &GroupKey) -> Enrichment {
        let name = self.name_of(key);
        let value = self.price_of(&name);
        Enrichment { name, value }
    }
}

fn fallback_name(key: &GroupKey) -> String {
    match key.kind {
        ItemKind::Wall if !key.variant.is_empty() => format!("{}_{}", key.class, key.variant),
        _ => key.class.clone(),
    }
}
