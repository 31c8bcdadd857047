//! # Values and Views
//!
//! Every type has an owned representation and a non-owning view. [`Data`] is
//! the sum of all owned representations; [`DataView`] is the sum of all
//! views plus a null alternative. Views and owned values compare equal
//! elementwise and hash identically; `owned → view` is free,
//! `view → owned` ([`DataView::materialize`]) allocates as needed.

pub mod yaml;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};

use crate::types::{EnumerationType, Kind, TypeError};

// -- scalar newtypes ---------------------------------------------------------

/// Signed nanosecond duration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Duration(pub i64);

impl Duration {
    pub const fn from_nanos(nanos: i64) -> Self {
        Duration(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Duration(millis * 1_000_000)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Duration(secs * 1_000_000_000)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    pub fn to_std(self) -> Option<std::time::Duration> {
        u64::try_from(self.0)
            .ok()
            .map(std::time::Duration::from_nanos)
    }

    /// Parses a suffix-annotated duration such as `1.5s` or `250ms`.
    pub fn parse(input: &str) -> Option<Duration> {
        let input = input.trim();
        let split = input.find(|c: char| c.is_ascii_alphabetic())?;
        let (number, unit) = input.split_at(split);
        let factor: f64 = match unit.trim() {
            "ns" => 1.0,
            "us" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "min" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "d" => 86_400.0 * 1e9,
            _ => return None,
        };
        let value: f64 = number.trim().parse().ok()?;
        let nanos = value * factor;
        if !nanos.is_finite() || nanos.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Duration(nanos.round() as i64))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(i64, &str); 6] = [
            (86_400_000_000_000, "d"),
            (3_600_000_000_000, "h"),
            (60_000_000_000, "min"),
            (1_000_000_000, "s"),
            (1_000_000, "ms"),
            (1_000, "us"),
        ];
        let nanos = self.0;
        for (factor, unit) in UNITS {
            if nanos % factor == 0 {
                return write!(f, "{}{}", nanos / factor, unit);
            }
        }
        write!(f, "{nanos}ns")
    }
}

/// Absolute wall-clock moment with nanosecond precision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Time(pub i64);

impl Time {
    pub const fn from_epoch_nanos(nanos: i64) -> Self {
        Time(nanos)
    }

    pub const fn as_epoch_nanos(self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        Time(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }

    /// Parses an ISO-8601 timestamp with timezone offset.
    pub fn parse(input: &str) -> Option<Time> {
        let parsed = DateTime::parse_from_rfc3339(input.trim()).ok()?;
        Some(Time(parsed.timestamp_nanos_opt()?))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.to_datetime().to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

/// A 128-bit IP address. IPv4 addresses canonicalise to the v4-mapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ip(pub Ipv6Addr);

impl Ip {
    pub fn from_addr(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Ip(v4.to_ipv6_mapped()),
            IpAddr::V6(v6) => Ip(v6),
        }
    }

    pub fn octets(self) -> [u8; 16] {
        self.0.octets()
    }

    pub fn from_octets(octets: [u8; 16]) -> Self {
        Ip(Ipv6Addr::from(octets))
    }

    pub fn is_v4_mapped(self) -> bool {
        self.0.to_ipv4_mapped().is_some()
    }

    pub fn parse(input: &str) -> Option<Ip> {
        input.trim().parse::<IpAddr>().ok().map(Ip::from_addr)
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.to_ipv4_mapped() {
            Some(v4) => write!(f, "{v4}"),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<IpAddr> for Ip {
    fn from(addr: IpAddr) -> Self {
        Ip::from_addr(addr)
    }
}

/// An IP subnet: network address plus prefix length in `[0, 128]`.
///
/// IPv4 subnets canonicalise into the v4-mapped range with the prefix
/// shifted by 96, so `192.168.0.5 in 192.168.0.0/24` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subnet {
    network: Ipv6Addr,
    length: u8,
}

impl Subnet {
    pub fn new(addr: IpAddr, length: u8) -> Result<Self, TypeError> {
        let (addr, length) = match addr {
            IpAddr::V4(v4) => {
                if length > 32 {
                    return Err(TypeError::PrefixOutOfRange(length));
                }
                (v4.to_ipv6_mapped(), length + 96)
            }
            IpAddr::V6(v6) => {
                if length > 128 {
                    return Err(TypeError::PrefixOutOfRange(length));
                }
                (v6, length)
            }
        };
        let net = Ipv6Net::new(addr, length).expect("prefix checked above");
        Ok(Subnet {
            network: net.network(),
            length,
        })
    }

    pub fn network(&self) -> Ip {
        Ip(self.network)
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn contains(&self, ip: Ip) -> bool {
        Ipv6Net::new(self.network, self.length)
            .expect("length invariant")
            .contains(&ip.0)
    }

    /// Parses `<ip>/<prefix>` in either v4 or v6 notation.
    pub fn parse(input: &str) -> Option<Subnet> {
        let (addr, length) = input.trim().split_once('/')?;
        let addr: IpAddr = addr.parse().ok()?;
        let length: u8 = length.parse().ok()?;
        Subnet::new(addr, length).ok()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.network.to_ipv4_mapped() {
            Some(v4) if self.length >= 96 => write!(f, "{}/{}", v4, self.length - 96),
            _ => write!(f, "{}/{}", self.network, self.length),
        }
    }
}

/// A regular expression value. Holds the UTF-8 source; compilation happens
/// in the evaluation session, which caches per expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pattern {
    source: String,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        Pattern {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn compile(&self) -> Result<regex::Regex, regex::Error> {
        regex::Regex::new(&self.source)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

/// A value of an enumeration type: the ordinal plus its type for name
/// lookups.
#[derive(Debug, Clone)]
pub struct EnumValue {
    ty: Arc<EnumerationType>,
    ordinal: u32,
}

impl EnumValue {
    pub fn new(ty: Arc<EnumerationType>, ordinal: u32) -> Option<Self> {
        ty.name(ordinal)?;
        Some(EnumValue { ty, ordinal })
    }

    pub fn from_name(ty: Arc<EnumerationType>, name: &str) -> Option<Self> {
        let ordinal = ty.ordinal(name)?;
        Some(EnumValue { ty, ordinal })
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        self.ty.name(self.ordinal).expect("ordinal checked at construction")
    }

    pub fn enumeration(&self) -> &Arc<EnumerationType> {
        &self.ty
    }
}

/// Comparable by name and by ordinal: equal iff both agree.
impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        self.ordinal == other.ordinal && self.name() == other.name()
    }
}

impl Eq for EnumValue {}

impl PartialOrd for EnumValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EnumValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal
            .cmp(&other.ordinal)
            .then_with(|| self.name().cmp(other.name()))
    }
}

impl Hash for EnumValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ordinal.hash(state);
        self.name().hash(state);
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for EnumValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.ty.variants(), self.ordinal).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EnumValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (variants, ordinal): (Vec<String>, u32) = Deserialize::deserialize(deserializer)?;
        let ty = EnumerationType::new(variants).map_err(serde::de::Error::custom)?;
        EnumValue::new(Arc::new(ty), ordinal)
            .ok_or_else(|| serde::de::Error::custom("enum ordinal out of range"))
    }
}

// -- data --------------------------------------------------------------------

/// The sum of all owned value representations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Data {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Duration(Duration),
    Time(Time),
    String(String),
    Blob(Vec<u8>),
    Ip(Ip),
    Subnet(Subnet),
    Pattern(Pattern),
    Enumeration(EnumValue),
    List(Vec<Data>),
    /// Insertion-ordered key/value pairs; keys unique.
    Map(Vec<(Data, Data)>),
    /// Ordered named fields; names unique within the record.
    Record(Vec<(String, Data)>),
}

impl Data {
    pub fn kind(&self) -> Kind {
        match self {
            Data::Null => Kind::Null,
            Data::Bool(_) => Kind::Bool,
            Data::Int64(_) => Kind::Int64,
            Data::UInt64(_) => Kind::UInt64,
            Data::Double(_) => Kind::Double,
            Data::Duration(_) => Kind::Duration,
            Data::Time(_) => Kind::Time,
            Data::String(_) => Kind::String,
            Data::Blob(_) => Kind::Blob,
            Data::Ip(_) => Kind::Ip,
            Data::Subnet(_) => Kind::Subnet,
            Data::Pattern(_) => Kind::Pattern,
            Data::Enumeration(_) => Kind::Enumeration,
            Data::List(_) => Kind::List,
            Data::Map(_) => Kind::Map,
            Data::Record(_) => Kind::Record,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    /// The always-available owned → view conversion.
    pub fn as_view(&self) -> DataView<'_> {
        match self {
            Data::Null => DataView::Null,
            Data::Bool(v) => DataView::Bool(*v),
            Data::Int64(v) => DataView::Int64(*v),
            Data::UInt64(v) => DataView::UInt64(*v),
            Data::Double(v) => DataView::Double(*v),
            Data::Duration(v) => DataView::Duration(*v),
            Data::Time(v) => DataView::Time(*v),
            Data::String(v) => DataView::String(v),
            Data::Blob(v) => DataView::Blob(v),
            Data::Ip(v) => DataView::Ip(*v),
            Data::Subnet(v) => DataView::Subnet(*v),
            Data::Pattern(v) => DataView::Pattern(v),
            Data::Enumeration(v) => DataView::Enumeration(v),
            Data::List(v) => DataView::List(v),
            Data::Map(v) => DataView::Map(v),
            Data::Record(v) => DataView::Record(v),
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::Null
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.as_view() == other.as_view()
    }
}

impl Eq for Data {}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_view().cmp(&other.as_view())
    }
}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_view().hash(state)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_view())
    }
}

impl From<bool> for Data {
    fn from(v: bool) -> Self {
        Data::Bool(v)
    }
}

impl From<i64> for Data {
    fn from(v: i64) -> Self {
        Data::Int64(v)
    }
}

impl From<u64> for Data {
    fn from(v: u64) -> Self {
        Data::UInt64(v)
    }
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Double(v)
    }
}

impl From<&str> for Data {
    fn from(v: &str) -> Self {
        Data::String(v.to_string())
    }
}

impl From<String> for Data {
    fn from(v: String) -> Self {
        Data::String(v)
    }
}

impl<T: Into<Data>> From<Option<T>> for Data {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Data::Null,
        }
    }
}

// -- views -------------------------------------------------------------------

/// The sum of all views, plus a null alternative.
///
/// Cheaply copyable; container views yield views of their elements.
#[derive(Debug, Clone, Copy)]
pub enum DataView<'a> {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Duration(Duration),
    Time(Time),
    String(&'a str),
    Blob(&'a [u8]),
    Ip(Ip),
    Subnet(Subnet),
    Pattern(&'a Pattern),
    Enumeration(&'a EnumValue),
    List(&'a [Data]),
    Map(&'a [(Data, Data)]),
    Record(&'a [(String, Data)]),
}

impl<'a> DataView<'a> {
    pub fn kind(&self) -> Kind {
        match self {
            DataView::Null => Kind::Null,
            DataView::Bool(_) => Kind::Bool,
            DataView::Int64(_) => Kind::Int64,
            DataView::UInt64(_) => Kind::UInt64,
            DataView::Double(_) => Kind::Double,
            DataView::Duration(_) => Kind::Duration,
            DataView::Time(_) => Kind::Time,
            DataView::String(_) => Kind::String,
            DataView::Blob(_) => Kind::Blob,
            DataView::Ip(_) => Kind::Ip,
            DataView::Subnet(_) => Kind::Subnet,
            DataView::Pattern(_) => Kind::Pattern,
            DataView::Enumeration(_) => Kind::Enumeration,
            DataView::List(_) => Kind::List,
            DataView::Map(_) => Kind::Map,
            DataView::Record(_) => Kind::Record,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataView::Null)
    }

    /// Allocates an owned value from this view.
    pub fn materialize(self) -> Data {
        match self {
            DataView::Null => Data::Null,
            DataView::Bool(v) => Data::Bool(v),
            DataView::Int64(v) => Data::Int64(v),
            DataView::UInt64(v) => Data::UInt64(v),
            DataView::Double(v) => Data::Double(v),
            DataView::Duration(v) => Data::Duration(v),
            DataView::Time(v) => Data::Time(v),
            DataView::String(v) => Data::String(v.to_string()),
            DataView::Blob(v) => Data::Blob(v.to_vec()),
            DataView::Ip(v) => Data::Ip(v),
            DataView::Subnet(v) => Data::Subnet(v),
            DataView::Pattern(v) => Data::Pattern(v.clone()),
            DataView::Enumeration(v) => Data::Enumeration(v.clone()),
            DataView::List(v) => Data::List(v.to_vec()),
            DataView::Map(v) => Data::Map(v.to_vec()),
            DataView::Record(v) => Data::Record(v.to_vec()),
        }
    }

    /// A rank for cross-kind ordering; values of the same kind compare by
    /// value, otherwise by rank.
    fn rank(&self) -> u8 {
        match self {
            DataView::Null => 0,
            DataView::Bool(_) => 1,
            DataView::Int64(_) => 2,
            DataView::UInt64(_) => 3,
            DataView::Double(_) => 4,
            DataView::Duration(_) => 5,
            DataView::Time(_) => 6,
            DataView::String(_) => 7,
            DataView::Blob(_) => 8,
            DataView::Ip(_) => 9,
            DataView::Subnet(_) => 10,
            DataView::Pattern(_) => 11,
            DataView::Enumeration(_) => 12,
            DataView::List(_) => 13,
            DataView::Map(_) => 14,
            DataView::Record(_) => 15,
        }
    }
}

impl PartialEq for DataView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DataView<'_> {}

impl PartialOrd for DataView<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataView<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        use DataView as V;
        match (self, other) {
            (V::Null, V::Null) => Ordering::Equal,
            (V::Bool(a), V::Bool(b)) => a.cmp(b),
            (V::Int64(a), V::Int64(b)) => a.cmp(b),
            (V::UInt64(a), V::UInt64(b)) => a.cmp(b),
            (V::Double(a), V::Double(b)) => a.total_cmp(b),
            (V::Duration(a), V::Duration(b)) => a.cmp(b),
            (V::Time(a), V::Time(b)) => a.cmp(b),
            (V::String(a), V::String(b)) => a.cmp(b),
            (V::Blob(a), V::Blob(b)) => a.cmp(b),
            (V::Ip(a), V::Ip(b)) => a.cmp(b),
            (V::Subnet(a), V::Subnet(b)) => a.cmp(b),
            (V::Pattern(a), V::Pattern(b)) => a.cmp(b),
            (V::Enumeration(a), V::Enumeration(b)) => a.cmp(b),
            (V::List(a), V::List(b)) => a.iter().cmp(b.iter()),
            (V::Map(a), V::Map(b)) => a.iter().cmp(b.iter()),
            (V::Record(a), V::Record(b)) => a.iter().cmp(b.iter()),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for DataView<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            DataView::Null => {}
            DataView::Bool(v) => v.hash(state),
            DataView::Int64(v) => v.hash(state),
            DataView::UInt64(v) => v.hash(state),
            DataView::Double(v) => state.write_u64(v.to_bits()),
            DataView::Duration(v) => v.hash(state),
            DataView::Time(v) => v.hash(state),
            DataView::String(v) => v.hash(state),
            DataView::Blob(v) => v.hash(state),
            DataView::Ip(v) => v.hash(state),
            DataView::Subnet(v) => v.hash(state),
            DataView::Pattern(v) => v.hash(state),
            DataView::Enumeration(v) => v.hash(state),
            DataView::List(v) => v.hash(state),
            DataView::Map(v) => v.hash(state),
            DataView::Record(v) => v.hash(state),
        }
    }
}

impl PartialEq<Data> for DataView<'_> {
    fn eq(&self, other: &Data) -> bool {
        *self == other.as_view()
    }
}

impl PartialEq<DataView<'_>> for Data {
    fn eq(&self, other: &DataView<'_>) -> bool {
        self.as_view() == *other
    }
}

impl fmt::Display for DataView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataView::Null => write!(f, "null"),
            DataView::Bool(v) => write!(f, "{v}"),
            DataView::Int64(v) => write!(f, "{v}"),
            DataView::UInt64(v) => write!(f, "{v}"),
            DataView::Double(v) => write!(f, "{v}"),
            DataView::Duration(v) => write!(f, "{v}"),
            DataView::Time(v) => write!(f, "{v}"),
            DataView::String(v) => write!(f, "{v:?}"),
            DataView::Blob(v) => write!(f, "<{} bytes>", v.len()),
            DataView::Ip(v) => write!(f, "{v}"),
            DataView::Subnet(v) => write!(f, "{v}"),
            DataView::Pattern(v) => write!(f, "{v}"),
            DataView::Enumeration(v) => write!(f, "{v}"),
            DataView::List(v) => {
                write!(f, "[")?;
                for (i, elem) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, "]")
            }
            DataView::Map(v) => {
                write!(f, "{{")?;
                for (i, (key, value)) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            DataView::Record(v) => {
                write!(f, "<")?;
                for (i, (name, value)) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, ">")
            }
        }
    }
}

/// Free-function form of [`DataView::materialize`], mirroring the view
/// protocol's vocabulary.
pub fn materialize(view: DataView<'_>) -> Data {
    view.materialize()
}
