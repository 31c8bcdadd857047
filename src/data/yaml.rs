//! YAML bridge for values.
//!
//! Converts between [`Data`] and YAML documents. Scalars that YAML cannot
//! express natively travel as strings: durations as suffix-annotated
//! strings (`"1.5s"`), times as ISO-8601 with timezone, IPs, subnets and
//! patterns in their textual forms. `YAML → data → YAML` round-trips every
//! value whose type is representable in the YAML surface.

use serde_yaml::{Mapping, Value as Yaml};

use super::{Data, Duration, Ip, Pattern, Subnet, Time};

/// Errors converting between YAML and data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum YamlError {
    #[error("YAML parse error: {0}")]
    Parse(String),
    #[error("unrepresentable value: {0}")]
    Unrepresentable(String),
    #[error("non-scalar YAML mapping key")]
    NonScalarKey,
}

impl From<serde_yaml::Error> for YamlError {
    fn from(e: serde_yaml::Error) -> Self {
        YamlError::Parse(e.to_string())
    }
}

/// Parses a YAML document into data.
pub fn from_yaml_str(input: &str) -> Result<Data, YamlError> {
    let value: Yaml = serde_yaml::from_str(input)?;
    from_yaml(&value)
}

/// Renders data as a YAML document.
pub fn to_yaml_str(data: &Data) -> Result<String, YamlError> {
    let value = to_yaml(data)?;
    Ok(serde_yaml::to_string(&value)?)
}

/// Converts a parsed YAML value into data.
///
/// Strings run through the scalar parse chain (time, duration, ip, subnet)
/// before falling back to plain strings, matching how configuration values
/// arrive untyped.
pub fn from_yaml(value: &Yaml) -> Result<Data, YamlError> {
    match value {
        Yaml::Null => Ok(Data::Null),
        Yaml::Bool(b) => Ok(Data::Bool(*b)),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Data::Int64(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Data::UInt64(u))
            } else {
                Ok(Data::Double(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Yaml::String(s) => Ok(parse_scalar(s)),
        Yaml::Sequence(seq) => {
            let elems = seq.iter().map(from_yaml).collect::<Result<Vec<_>, _>>()?;
            Ok(Data::List(elems))
        }
        Yaml::Mapping(mapping) => {
            // String-keyed mappings become records; anything else a map.
            if mapping.iter().all(|(k, _)| k.is_string()) {
                let fields = mapping
                    .iter()
                    .map(|(k, v)| {
                        let name = k.as_str().expect("checked above").to_string();
                        Ok((name, from_yaml(v)?))
                    })
                    .collect::<Result<Vec<_>, YamlError>>()?;
                Ok(Data::Record(fields))
            } else {
                let entries = mapping
                    .iter()
                    .map(|(k, v)| Ok((from_yaml(k)?, from_yaml(v)?)))
                    .collect::<Result<Vec<_>, YamlError>>()?;
                Ok(Data::Map(entries))
            }
        }
        Yaml::Tagged(tagged) => from_yaml(&tagged.value),
    }
}

fn parse_scalar(s: &str) -> Data {
    if let Some(t) = Time::parse(s) {
        return Data::Time(t);
    }
    if let Some(d) = Duration::parse(s) {
        return Data::Duration(d);
    }
    if let Some(net) = Subnet::parse(s) {
        return Data::Subnet(net);
    }
    if let Some(ip) = Ip::parse(s) {
        return Data::Ip(ip);
    }
    Data::String(s.to_string())
}

/// Converts data into a YAML value.
pub fn to_yaml(data: &Data) -> Result<Yaml, YamlError> {
    Ok(match data {
        Data::Null => Yaml::Null,
        Data::Bool(b) => Yaml::Bool(*b),
        Data::Int64(i) => Yaml::Number((*i).into()),
        Data::UInt64(u) => Yaml::Number((*u).into()),
        Data::Double(d) => Yaml::Number((*d).into()),
        Data::Duration(d) => Yaml::String(d.to_string()),
        Data::Time(t) => Yaml::String(t.to_string()),
        Data::String(s) => Yaml::String(s.clone()),
        Data::Blob(_) => {
            return Err(YamlError::Unrepresentable("blob".into()));
        }
        Data::Ip(ip) => Yaml::String(ip.to_string()),
        Data::Subnet(net) => Yaml::String(net.to_string()),
        Data::Pattern(p) => Yaml::String(p.source().to_string()),
        Data::Enumeration(e) => Yaml::String(e.name().to_string()),
        Data::List(elems) => Yaml::Sequence(
            elems
                .iter()
                .map(to_yaml)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Data::Map(entries) => {
            let mut mapping = Mapping::new();
            for (key, value) in entries {
                mapping.insert(to_yaml(key)?, to_yaml(value)?);
            }
            Yaml::Mapping(mapping)
        }
        Data::Record(fields) => {
            let mut mapping = Mapping::new();
            for (name, value) in fields {
                mapping.insert(Yaml::String(name.clone()), to_yaml(value)?);
            }
            Yaml::Mapping(mapping)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_to_data_to_yaml_roundtrip() {
        let input = "\
alert:
  severity: 3
  score: 0.9
  active: true
  source: 10.0.0.1
  network: 10.0.0.0/8
  window: 90s
  seen: 2024-05-01T12:30:00Z
  tags:
    - scan
    - lateral
  comment: null
";
        let data = from_yaml_str(input).unwrap();
        let printed = to_yaml_str(&data).unwrap();
        let reparsed = from_yaml_str(&printed).unwrap();
        assert_eq!(data, reparsed);
    }

    #[test]
    fn test_scalar_parse_chain() {
        assert_eq!(parse_scalar("90s"), Data::Duration(Duration::from_secs(90)));
        assert_eq!(
            parse_scalar("10.0.0.1"),
            Data::Ip(Ip::parse("10.0.0.1").unwrap())
        );
        assert_eq!(
            parse_scalar("10.0.0.0/8"),
            Data::Subnet(Subnet::parse("10.0.0.0/8").unwrap())
        );
        assert_eq!(parse_scalar("hello"), Data::String("hello".into()));
    }

    #[test]
    fn test_record_vs_map() {
        let record = from_yaml_str("a: 1\nb: 2\n").unwrap();
        assert!(matches!(record, Data::Record(_)));
        let map = from_yaml_str("1: x\n2: y\n").unwrap();
        assert!(matches!(map, Data::Map(_)));
    }

    #[test]
    fn test_field_order_preserved() {
        let data = from_yaml_str("z: 1\na: 2\nm: 3\n").unwrap();
        match data {
            Data::Record(fields) => {
                let names: Vec<_> = fields.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, ["z", "a", "m"]);
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_blob_unrepresentable() {
        let err = to_yaml_str(&Data::Blob(vec![1, 2, 3])).unwrap_err();
        assert_eq!(err, YamlError::Unrepresentable("blob".into()));
    }

    #[test]
    fn test_pattern_and_enum_render_as_strings() {
        assert_eq!(
            to_yaml(&Data::Pattern(Pattern::new("^a$"))).unwrap(),
            Yaml::String("^a$".into())
        );
    }
}
