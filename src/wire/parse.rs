use super::event::{GaugeSign, Observation, Value};

/// Sanitizes a bucket name: keeps ASCII alphanumerics and `.`/`-`/`_`,
/// maps space to `_` and `/` to `-`, drops every other byte.
pub fn sanitize_bucket(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    sanitize_into(raw, &mut out);
    out
}

fn sanitize_into(raw: &[u8], out: &mut String) {
    for &c in raw {
        match c {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' => out.push(c as char),
            b' ' => out.push('_'),
            b'/' => out.push('-'),
            _ => {}
        }
    }
}

/// Parses StatsD wire lines into observations.
///
/// The configured prefix and postfix are sanitized once here and baked into
/// every bucket name the parser produces, so downstream state never has to
/// re-apply them.
#[derive(Debug, Clone)]
pub struct LineParser {
    prefix: String,
    postfix: String,
}

impl LineParser {
    pub fn new(prefix: &str, postfix: &str) -> Self {
        Self {
            prefix: sanitize_bucket(prefix.as_bytes()),
            postfix: sanitize_bucket(postfix.as_bytes()),
        }
    }

    /// Parses one line (no trailing newline).
    ///
    /// Grammar: `name ":" value "|" type ( "|@" sampling )?` with
    /// `type ∈ {c, g, ms, s}`. Returns None on any syntax or numeric
    /// failure; never panics.
    pub fn parse(&self, line: &[u8]) -> Option<Observation> {
        let mut fields = line.splitn(3, |&b| b == b'|');
        let keyval = fields.next()?;
        let type_code = fields.next()?;
        let trailer = fields.next();

        let mut sampling = 1.0f32;
        if type_code == b"c" || type_code == b"ms" {
            if let Some(rate) = trailer.and_then(|t| t.strip_prefix(b"@")) {
                let parsed: f32 = std::str::from_utf8(rate).ok()?.parse().ok()?;
                if !(parsed > 0.0 && parsed <= 1.0) {
                    return None;
                }
                sampling = parsed;
            }
        }

        let colon = keyval.iter().position(|&b| b == b':')?;
        let (name, val) = (&keyval[..colon], &keyval[colon + 1..]);
        if name.is_empty() || val.is_empty() {
            return None;
        }

        let value = match type_code {
            b"c" => Value::Counter(parse_f64(val)?),
            b"ms" => Value::Timer(parse_nonneg(val)?),
            b"g" => match val[0] {
                b'+' => Value::Gauge(GaugeSign::Add, parse_nonneg(&val[1..])?),
                b'-' => Value::Gauge(GaugeSign::Subtract, parse_nonneg(&val[1..])?),
                _ => Value::Gauge(GaugeSign::Absolute, parse_nonneg(val)?),
            },
            b"s" => Value::Set(String::from_utf8_lossy(val).into_owned()),
            _ => return None,
        };

        let bucket = self.full_bucket(name);
        if bucket.is_empty() {
            return None;
        }

        Some(Observation {
            bucket,
            value,
            sampling,
        })
    }

    fn full_bucket(&self, name: &[u8]) -> String {
        let mut bucket =
            String::with_capacity(self.prefix.len() + name.len() + self.postfix.len());
        bucket.push_str(&self.prefix);
        sanitize_into(name, &mut bucket);
        bucket.push_str(&self.postfix);
        bucket
    }
}

fn parse_f64(raw: &[u8]) -> Option<f64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Parses a float that must satisfy `v >= 0.0` (rejects negatives and NaN).
fn parse_nonneg(raw: &[u8]) -> Option<f64> {
    let v = parse_f64(raw)?;
    if v >= 0.0 {
        Some(v)
    } else {
        None
    }
}
