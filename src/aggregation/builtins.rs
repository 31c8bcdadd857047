//! Built-in aggregation functions.
//!
//! `any`/`all` work on boolean columns, `min`/`max`/`sum` on numeric,
//! duration and time columns, `count`/`count_distinct`/`distinct` on
//! anything hashable, and `mode`/`value_counts`/`entropy`/`top`/`rare`
//! share one counted-values core. `first`/`last` are order-sensitive and
//! report themselves as non-deterministic.

use arrow::array::{Array, BooleanArray};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::aggregation::{
    restore_state, save_state, series_values, AggrState, Aggregation, AggregationRegistry,
};
use crate::data::Data;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::expr::{compare_numeric, ArithOp, Series};
use crate::types::Kind;

/// Registers all built-in aggregation functions.
pub fn register_builtins(registry: &mut AggregationRegistry) {
    registry.register("any", || Box::new(AnyAll::new(AnyAllKind::Any)));
    registry.register("all", || Box::new(AnyAll::new(AnyAllKind::All)));
    registry.register("min", || Box::new(Extremum::new(ExtremumKind::Min)));
    registry.register("max", || Box::new(Extremum::new(ExtremumKind::Max)));
    registry.register("sum", || Box::new(Sum::new()));
    registry.register("count", || Box::new(Count::new()));
    registry.register("count_distinct", || {
        Box::new(Distinct::new(DistinctKind::Count))
    });
    registry.register("distinct", || Box::new(Distinct::new(DistinctKind::List)));
    registry.register("mode", || Box::new(Counted::new(CountedKind::Mode)));
    registry.register("value_counts", || {
        Box::new(Counted::new(CountedKind::ValueCounts))
    });
    registry.register("entropy", || {
        Box::new(Counted::new(CountedKind::Entropy { normalize: false }))
    });
    registry.register("entropy_normalized", || {
        Box::new(Counted::new(CountedKind::Entropy { normalize: true }))
    });
    registry.register("top", || Box::new(Counted::new(CountedKind::Top { limit: 10 })));
    registry.register("rare", || {
        Box::new(Counted::new(CountedKind::Rare { limit: 10 }))
    });
    registry.register("first", || Box::new(FirstLast::new(FirstLastKind::First)));
    registry.register("last", || Box::new(FirstLast::new(FirstLastKind::Last)));
}

fn warn_type(diag: &dyn DiagnosticSink, function: &str, expected: &str, got: Kind) {
    Diagnostic::warning(format!("expected {expected}, got `{got}`"))
        .hint(format!("in aggregation function `{function}`"))
        .emit(diag);
}

// -- any / all ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyAllKind {
    Any,
    All,
}

impl AnyAllKind {
    fn name(&self) -> &'static str {
        match self {
            AnyAllKind::Any => "any",
            AnyAllKind::All => "all",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct AnyAllPayload {
    result: bool,
    state: AggrState,
}

/// Boolean disjunction/conjunction over a column.
pub struct AnyAll {
    kind: AnyAllKind,
    result: bool,
    state: AggrState,
}

impl AnyAll {
    pub fn new(kind: AnyAllKind) -> Self {
        AnyAll {
            kind,
            result: kind == AnyAllKind::All,
            state: AggrState::None,
        }
    }
}

impl Aggregation for AnyAll {
    fn update(&mut self, input: &Series, diag: &dyn DiagnosticSink) {
        if self.state == AggrState::Failed {
            return;
        }
        match input.ty.kind() {
            // A column of type null does not contribute.
            Kind::Null => {}
            Kind::Bool => {
                let array = input
                    .array
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .expect("bool series");
                match self.kind {
                    AnyAllKind::Any => self.result = self.result || array.true_count() > 0,
                    AnyAllKind::All => self.result = self.result && array.false_count() == 0,
                }
                if array.null_count() > 0 {
                    self.state = self.state.merge(AggrState::Nulled);
                }
            }
            other => {
                warn_type(diag, self.kind.name(), "type `bool`", other);
                self.state = AggrState::Failed;
            }
        }
    }

    fn get(&self) -> Data {
        match self.state {
            AggrState::Failed => Data::Null,
            AggrState::None => Data::Bool(self.result),
            AggrState::Nulled => {
                // A known-dominant value wins despite nulls.
                let dominant = match self.kind {
                    AnyAllKind::Any => self.result,
                    AnyAllKind::All => !self.result,
                };
                if dominant {
                    Data::Bool(self.result)
                } else {
                    Data::Null
                }
            }
        }
    }

    fn save(&self) -> Vec<u8> {
        save_state(&AnyAllPayload {
            result: self.result,
            state: self.state,
        })
    }

    fn restore(&mut self, bytes: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) =
            restore_state::<AnyAllPayload>(bytes, self.kind.name(), diag)
        {
            self.result = payload.result;
            self.state = payload.state;
        }
    }

    fn reset(&mut self) {
        *self = AnyAll::new(self.kind);
    }

    fn merge(&mut self, saved: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<AnyAllPayload>(saved, self.kind.name(), diag) {
            match self.kind {
                AnyAllKind::Any => self.result = self.result || payload.result,
                AnyAllKind::All => self.result = self.result && payload.result,
            }
            self.state = self.state.merge(payload.state);
        }
    }
}

// -- min / max ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumKind {
    Min,
    Max,
}

impl ExtremumKind {
    fn name(&self) -> &'static str {
        match self {
            ExtremumKind::Min => "min",
            ExtremumKind::Max => "max",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ExtremumPayload {
    value: Option<Data>,
    state: AggrState,
}

/// Minimum/maximum over numeric, duration and time columns.
pub struct Extremum {
    kind: ExtremumKind,
    value: Option<Data>,
    state: AggrState,
}

impl Extremum {
    pub fn new(kind: ExtremumKind) -> Self {
        Extremum {
            kind,
            value: None,
            state: AggrState::None,
        }
    }

    fn consider(&mut self, candidate: Data, diag: &dyn DiagnosticSink) {
        match &self.value {
            None => self.value = Some(candidate),
            Some(current) => {
                let ordering = compare_numeric(current.as_view(), candidate.as_view())
                    .or_else(|| {
                        (current.kind() == candidate.kind())
                            .then(|| current.cmp(&candidate))
                    });
                match ordering {
                    Some(ordering) => {
                        let replace = match self.kind {
                            ExtremumKind::Min => ordering == std::cmp::Ordering::Greater,
                            ExtremumKind::Max => ordering == std::cmp::Ordering::Less,
                        };
                        if replace {
                            self.value = Some(candidate);
                        }
                    }
                    None => {
                        warn_type(
                            diag,
                            self.kind.name(),
                            &format!("`{}`", current.kind()),
                            candidate.kind(),
                        );
                        self.state = AggrState::Failed;
                    }
                }
            }
        }
    }
}

impl Aggregation for Extremum {
    fn update(&mut self, input: &Series, diag: &dyn DiagnosticSink) {
        if self.state == AggrState::Failed {
            return;
        }
        if input.ty.kind() == Kind::Null {
            self.state = self.state.merge(AggrState::Nulled);
            return;
        }
        if !matches!(
            input.ty.kind(),
            Kind::Int64 | Kind::UInt64 | Kind::Double | Kind::Duration | Kind::Time
        ) {
            warn_type(
                diag,
                self.kind.name(),
                "types `int64`, `uint64`, `double`, `duration` or `time`",
                input.ty.kind(),
            );
            self.state = AggrState::Failed;
            return;
        }
        for value in series_values(input) {
            if self.state == AggrState::Failed {
                return;
            }
            match value {
                Data::Null => self.state = self.state.merge(AggrState::Nulled),
                value => self.consider(value, diag),
            }
        }
    }

    fn get(&self) -> Data {
        match (&self.state, &self.value) {
            (AggrState::Failed, _) => Data::Null,
            (_, Some(value)) => value.clone(),
            (_, None) => Data::Null,
        }
    }

    fn save(&self) -> Vec<u8> {
        save_state(&ExtremumPayload {
            value: self.value.clone(),
            state: self.state,
        })
    }

    fn restore(&mut self, bytes: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<ExtremumPayload>(bytes, self.kind.name(), diag) {
            self.value = payload.value;
            self.state = payload.state;
        }
    }

    fn reset(&mut self) {
        *self = Extremum::new(self.kind);
    }

    fn merge(&mut self, saved: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<ExtremumPayload>(saved, self.kind.name(), diag) {
            self.state = self.state.merge(payload.state);
            if self.state == AggrState::Failed {
                return;
            }
            if let Some(value) = payload.value {
                self.consider(value, diag);
            }
        }
    }
}

// -- sum ---------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct SumPayload {
    value: Option<Data>,
    state: AggrState,
}

/// Sum over numeric and duration columns with overflow detection.
pub struct Sum {
    value: Option<Data>,
    state: AggrState,
}

impl Sum {
    pub fn new() -> Self {
        Sum {
            value: None,
            state: AggrState::None,
        }
    }

    fn add(&mut self, value: Data, diag: &dyn DiagnosticSink) {
        match self.value.take() {
            None => self.value = Some(value),
            Some(current) => {
                match crate::expr::eval::scalar_arith(ArithOp::Add, &current, &value) {
                    Ok(sum) => self.value = Some(sum),
                    Err(message) => {
                        Diagnostic::warning(message)
                            .hint("in aggregation function `sum`")
                            .emit(diag);
                        self.state = AggrState::Failed;
                    }
                }
            }
        }
    }
}

impl Default for Sum {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregation for Sum {
    fn update(&mut self, input: &Series, diag: &dyn DiagnosticSink) {
        if self.state == AggrState::Failed {
            return;
        }
        if input.ty.kind() == Kind::Null {
            self.state = self.state.merge(AggrState::Nulled);
            return;
        }
        if !matches!(
            input.ty.kind(),
            Kind::Int64 | Kind::UInt64 | Kind::Double | Kind::Duration
        ) {
            warn_type(
                diag,
                "sum",
                "types `int64`, `uint64`, `double` or `duration`",
                input.ty.kind(),
            );
            self.state = AggrState::Failed;
            return;
        }
        for value in series_values(input) {
            if self.state == AggrState::Failed {
                return;
            }
            match value {
                Data::Null => self.state = self.state.merge(AggrState::Nulled),
                value => self.add(value, diag),
            }
        }
    }

    fn get(&self) -> Data {
        match (&self.state, &self.value) {
            (AggrState::Failed, _) => Data::Null,
            (_, Some(value)) => value.clone(),
            (_, None) => Data::Null,
        }
    }

    fn save(&self) -> Vec<u8> {
        save_state(&SumPayload {
            value: self.value.clone(),
            state: self.state,
        })
    }

    fn restore(&mut self, bytes: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<SumPayload>(bytes, "sum", diag) {
            self.value = payload.value;
            self.state = payload.state;
        }
    }

    fn reset(&mut self) {
        *self = Sum::new();
    }

    fn merge(&mut self, saved: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<SumPayload>(saved, "sum", diag) {
            self.state = self.state.merge(payload.state);
            if self.state == AggrState::Failed {
                return;
            }
            if let Some(value) = payload.value {
                self.add(value, diag);
            }
        }
    }
}

// -- count -------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct CountPayload {
    count: u64,
}

/// Counts non-null values.
pub struct Count {
    count: u64,
}

impl Count {
    pub fn new() -> Self {
        Count { count: 0 }
    }
}

impl Default for Count {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregation for Count {
    fn update(&mut self, input: &Series, _diag: &dyn DiagnosticSink) {
        if input.ty.kind() == Kind::Null {
            return;
        }
        let nulls = input.array.null_count();
        self.count += (input.len() - nulls) as u64;
    }

    fn get(&self) -> Data {
        Data::UInt64(self.count)
    }

    fn save(&self) -> Vec<u8> {
        save_state(&CountPayload { count: self.count })
    }

    fn restore(&mut self, bytes: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<CountPayload>(bytes, "count", diag) {
            self.count = payload.count;
        }
    }

    fn reset(&mut self) {
        self.count = 0;
    }

    fn merge(&mut self, saved: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<CountPayload>(saved, "count", diag) {
            self.count += payload.count;
        }
    }
}

// -- distinct / count_distinct ----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctKind {
    Count,
    List,
}

impl DistinctKind {
    fn name(&self) -> &'static str {
        match self {
            DistinctKind::Count => "count_distinct",
            DistinctKind::List => "distinct",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DistinctPayload {
    values: Vec<Data>,
}

/// Distinct values in first-seen order.
pub struct Distinct {
    kind: DistinctKind,
    values: IndexMap<Data, ()>,
}

impl Distinct {
    pub fn new(kind: DistinctKind) -> Self {
        Distinct {
            kind,
            values: IndexMap::new(),
        }
    }
}

impl Aggregation for Distinct {
    fn update(&mut self, input: &Series, _diag: &dyn DiagnosticSink) {
        if input.ty.kind() == Kind::Null {
            return;
        }
        for value in series_values(input) {
            if !value.is_null() {
                self.values.entry(value).or_insert(());
            }
        }
    }

    fn get(&self) -> Data {
        match self.kind {
            DistinctKind::Count => Data::UInt64(self.values.len() as u64),
            DistinctKind::List => Data::List(self.values.keys().cloned().collect()),
        }
    }

    fn save(&self) -> Vec<u8> {
        save_state(&DistinctPayload {
            values: self.values.keys().cloned().collect(),
        })
    }

    fn restore(&mut self, bytes: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<DistinctPayload>(bytes, self.kind.name(), diag) {
            self.values = payload.values.into_iter().map(|v| (v, ())).collect();
        }
    }

    fn reset(&mut self) {
        self.values.clear();
    }

    fn merge(&mut self, saved: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<DistinctPayload>(saved, self.kind.name(), diag) {
            for value in payload.values {
                self.values.entry(value).or_insert(());
            }
        }
    }
}

// -- counted values: mode, value_counts, entropy, top, rare ------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CountedKind {
    Mode,
    ValueCounts,
    Entropy { normalize: bool },
    Top { limit: usize },
    Rare { limit: usize },
}

impl CountedKind {
    fn name(&self) -> &'static str {
        match self {
            CountedKind::Mode => "mode",
            CountedKind::ValueCounts => "value_counts",
            CountedKind::Entropy { .. } => "entropy",
            CountedKind::Top { .. } => "top",
            CountedKind::Rare { .. } => "rare",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CountedPayload {
    counts: Vec<(Data, u64)>,
}

/// Value-frequency core shared by the frequency-shaped functions.
///
/// Counts keep first-seen insertion order, which makes the `mode`
/// tie-break deterministic: among values with equal counts, the earliest
/// seen wins.
pub struct Counted {
    kind: CountedKind,
    counts: IndexMap<Data, u64>,
}

impl Counted {
    pub fn new(kind: CountedKind) -> Self {
        Counted {
            kind,
            counts: IndexMap::new(),
        }
    }

    fn ranked(&self, descending: bool, limit: usize) -> Vec<(Data, u64)> {
        let mut entries: Vec<(Data, u64)> = self
            .counts
            .iter()
            .map(|(v, c)| (v.clone(), *c))
            .collect();
        // Stable sort preserves first-seen order among equal counts.
        if descending {
            entries.sort_by(|a, b| b.1.cmp(&a.1));
        } else {
            entries.sort_by(|a, b| a.1.cmp(&b.1));
        }
        entries.truncate(limit);
        entries
    }
}

impl Aggregation for Counted {
    fn update(&mut self, input: &Series, _diag: &dyn DiagnosticSink) {
        if input.ty.kind() == Kind::Null {
            return;
        }
        for value in series_values(input) {
            if !value.is_null() {
                *self.counts.entry(value).or_insert(0) += 1;
            }
        }
    }

    fn get(&self) -> Data {
        match self.kind {
            CountedKind::Mode => {
                let mut best: Option<(&Data, u64)> = None;
                for (value, count) in &self.counts {
                    // Strictly greater keeps the first-seen winner on ties.
                    if best.map(|(_, c)| *count > c).unwrap_or(true) {
                        best = Some((value, *count));
                    }
                }
                best.map(|(v, _)| v.clone()).unwrap_or(Data::Null)
            }
            CountedKind::ValueCounts => {
                let mut entries: Vec<(Data, u64)> = self
                    .counts
                    .iter()
                    .map(|(v, c)| (v.clone(), *c))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Data::List(
                    entries
                        .into_iter()
                        .map(|(value, count)| {
                            Data::Record(vec![
                                ("value".into(), value),
                                ("count".into(), Data::UInt64(count)),
                            ])
                        })
                        .collect(),
                )
            }
            CountedKind::Entropy { normalize } => {
                if self.counts.len() <= 1 {
                    return Data::Double(0.0);
                }
                let total: u64 = self.counts.values().sum();
                let mut entropy = 0.0;
                for count in self.counts.values() {
                    let p = *count as f64 / total as f64;
                    if p > 0.0 {
                        entropy -= p * p.ln();
                    }
                }
                if normalize {
                    entropy /= (self.counts.len() as f64).ln();
                }
                Data::Double(entropy)
            }
            CountedKind::Top { limit } => Data::List(
                self.ranked(true, limit)
                    .into_iter()
                    .map(|(value, count)| {
                        Data::Record(vec![
                            ("value".into(), value),
                            ("count".into(), Data::UInt64(count)),
                        ])
                    })
                    .collect(),
            ),
            CountedKind::Rare { limit } => Data::List(
                self.ranked(false, limit)
                    .into_iter()
                    .map(|(value, count)| {
                        Data::Record(vec![
                            ("value".into(), value),
                            ("count".into(), Data::UInt64(count)),
                        ])
                    })
                    .collect(),
            ),
        }
    }

    fn save(&self) -> Vec<u8> {
        save_state(&CountedPayload {
            counts: self
                .counts
                .iter()
                .map(|(v, c)| (v.clone(), *c))
                .collect(),
        })
    }

    fn restore(&mut self, bytes: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<CountedPayload>(bytes, self.kind.name(), diag) {
            self.counts = payload.counts.into_iter().collect();
        }
    }

    fn reset(&mut self) {
        self.counts.clear();
    }

    fn merge(&mut self, saved: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<CountedPayload>(saved, self.kind.name(), diag) {
            for (value, count) in payload.counts {
                *self.counts.entry(value).or_insert(0) += count;
            }
        }
    }
}

// -- first / last ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstLastKind {
    First,
    Last,
}

impl FirstLastKind {
    fn name(&self) -> &'static str {
        match self {
            FirstLastKind::First => "first",
            FirstLastKind::Last => "last",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct FirstLastPayload {
    value: Option<Data>,
}

/// First or last non-null value, in input order.
pub struct FirstLast {
    kind: FirstLastKind,
    value: Option<Data>,
}

impl FirstLast {
    pub fn new(kind: FirstLastKind) -> Self {
        FirstLast { kind, value: None }
    }
}

impl Aggregation for FirstLast {
    fn update(&mut self, input: &Series, _diag: &dyn DiagnosticSink) {
        if input.ty.kind() == Kind::Null {
            return;
        }
        for value in series_values(input) {
            if value.is_null() {
                continue;
            }
            match self.kind {
                FirstLastKind::First => {
                    if self.value.is_none() {
                        self.value = Some(value);
                    }
                }
                FirstLastKind::Last => self.value = Some(value),
            }
        }
    }

    fn get(&self) -> Data {
        self.value.clone().unwrap_or(Data::Null)
    }

    fn save(&self) -> Vec<u8> {
        save_state(&FirstLastPayload {
            value: self.value.clone(),
        })
    }

    fn restore(&mut self, bytes: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<FirstLastPayload>(bytes, self.kind.name(), diag)
        {
            self.value = payload.value;
        }
    }

    fn reset(&mut self) {
        self.value = None;
    }

    fn merge(&mut self, saved: &[u8], diag: &dyn DiagnosticSink) {
        if let Some(payload) = restore_state::<FirstLastPayload>(saved, self.kind.name(), diag)
        {
            match self.kind {
                FirstLastKind::First => {
                    if self.value.is_none() {
                        self.value = payload.value;
                    }
                }
                FirstLastKind::Last => {
                    if payload.value.is_some() {
                        self.value = payload.value;
                    }
                }
            }
        }
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}
