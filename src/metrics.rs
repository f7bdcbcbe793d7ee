// Copyright (C) 2025 the bloglist developers
//
// This file is part of bloglist.
//
// bloglist is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bloglist is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bloglist.  If not,
// see <http://www.gnu.org/licenses/>.

//! # bloglist metrics
//!
//! # Introduction
//!
//! bloglist collects [prometheus] instruments into a [Registry] rendered at `/metrics`. The
//! inconvenient question is where to *keep* the instruments: I'd prefer not to litter the state
//! type with a field of type [IntCounter] per metric, and a plain map from name to instrument
//! leaves the footgun of two call sites accidentally claiming the same metric name, barring an
//! inconvenient centralized list.
//!
//! [Registry]: prometheus::Registry
//!
//! This module uses David Tolnay's [inventory] crate to work around the need for a centralized
//! list. At the metric collection site:
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("blogs_added", "Blogs added", Sort::IntegralCounter) }
//! // ...
//! async fn do_thing() {
//!     // ...
//!     counter_add!(state.instruments, "blogs_added", 1);
//! }
//! ```
//!
//! The `submit!` invocation "registers" the metric name & the macro `counter_add!` handles the
//! lookup and unwrapping of the actual instrument at runtime. The [Instruments] constructor
//! checks for name clashes & "pre-builds" all the instruments into the registry.
//!
//! One aspect of this design with which I'm uncomfortable is the use of `panic!` to indicate
//! failure to lookup a metric by name, or incorrect typing of an instrument (e.g. calling
//! `counter_add!` on a metric that actually names a gauge). These are logic errors that would be
//! compile-time errors with a richer type system, and the convention seems to be to panic in
//! these instances, but a bad metric name in a little-used code path seems like a ticking time
//! bomb to me.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use prometheus::{IntCounter, IntGauge, Registry};

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to [IntCounter]
    IntegralCounter,
    /// Corresponds to [IntGauge]
    IntegralGauge,
    // more later?
}

/// The type of thing being inventoried
///
/// Register a metric by name, help text & type using
///
/// ```ignore
/// inventory::submit!{metrics::Registration::new("auth_successes", "...", Sort::IntegralCounter)}
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    help: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, help: &'static str, sort: Sort) -> Registration {
        Registration { name, help, sort }
    }
    pub fn help(&self) -> &'static str {
        self.help
    }
    pub fn name(&self) -> String {
        self.name.to_string()
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

/// Panic if any two call sites have claimed the same metric name; invoke once, at startup
pub fn check_metric_registrations() {
    let mut names: HashSet<String> = HashSet::new();
    IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
        if names.contains(&reg.name()) {
            panic!("The metric name {} was used twice", reg.name());
        }
        names.insert(reg.name());
    });
}

enum Instrument {
    Counter(IntCounter),
    Gauge(IntGauge),
}

/// Container for prometheus instruments
pub struct Instruments {
    map: HashMap<String, Instrument>,
}

impl Instruments {
    /// Build every registered instrument & register it with `registry`
    ///
    /// "Pre-creating" all the registered instruments risks building things that may never be
    /// used, but carries the benefit of making `add` and `recordu` *not* require a `&mut self`,
    /// meaning that an instance of this type can be held in an Arc.
    pub fn new(registry: &Registry) -> Instruments {
        let mut m: HashMap<String, Instrument> = HashMap::new();
        IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
            let name = reg.name();
            match m.entry(reg.name()) {
                Entry::Occupied(_occupied_entry) => {
                    panic!("The metric name {} was used twice", name)
                }
                Entry::Vacant(vacant_entry) => {
                    vacant_entry.insert(match reg.sort() {
                        Sort::IntegralCounter => {
                            let counter = IntCounter::new(reg.name(), reg.help())
                                .expect("Metric names are checked at startup");
                            registry
                                .register(Box::new(counter.clone()))
                                .expect("Metric names are checked at startup");
                            Instrument::Counter(counter)
                        }
                        Sort::IntegralGauge => {
                            let gauge = IntGauge::new(reg.name(), reg.help())
                                .expect("Metric names are checked at startup");
                            registry
                                .register(Box::new(gauge.clone()))
                                .expect("Metric names are checked at startup");
                            Instrument::Gauge(gauge)
                        }
                    });
                }
            }
        });

        Instruments { map: m }
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64) {
        if let Some(Instrument::Counter(c)) = self.map.get(name) {
            c.inc_by(count);
        } else {
            panic!("{} does not name a counter", name);
        }
    }
    // panics if `name` doesn't name a gauge
    pub fn recordu(&self, name: &str, value: u64) {
        if let Some(Instrument::Gauge(g)) = self.map.get(name) {
            g.set(value as i64);
        } else {
            panic!("{} does not name a gauge", name);
        }
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr) => {
        $instr.add($name, $count);
    };
}

#[macro_export]
macro_rules! gauge_setu {
    ($instr:expr, $name:expr, $value:expr) => {
        $instr.recordu($name, $value);
    };
}
