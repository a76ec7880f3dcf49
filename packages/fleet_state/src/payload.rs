//! Field access over a message's JSON `data` object.
//!
//! The backend is loose about types: ids may be numbers, decimals may arrive
//! as strings, and several fields have more than one accepted name.

use chrono::{DateTime, Utc};
use push_channel::PushMessage;
use push_channel::envelope::parse_timestamp;
use serde_json::{Map, Value};

use crate::error::DecodeError;

pub(crate) struct Payload<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> Payload<'a> {
    pub(crate) fn of(message: &'a PushMessage) -> Result<Self, DecodeError> {
        match &message.data {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(DecodeError::NotAnObject),
        }
    }

    fn first(&self, names: &[&str]) -> Option<&'a Value> {
        names
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .find(|v| !v.is_null())
    }

    /// First non-empty string (or number, rendered) among `names`.
    pub(crate) fn text(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| match self.fields.get(*name)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .next()
    }

    pub(crate) fn require_text(
        &self,
        field: &'static str,
        names: &[&str],
    ) -> Result<String, DecodeError> {
        self.text(names).ok_or(DecodeError::MissingField(field))
    }

    pub(crate) fn number(&self, field: &'static str) -> Result<Option<f64>, DecodeError> {
        match self.first(&[field]) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| DecodeError::invalid(field, "not representable as f64")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|e| DecodeError::invalid(field, e)),
            Some(other) => Err(DecodeError::invalid(field, format!("unexpected {}", other))),
        }
    }

    pub(crate) fn require_number(&self, field: &'static str) -> Result<f64, DecodeError> {
        self.number(field)?.ok_or(DecodeError::MissingField(field))
    }

    pub(crate) fn timestamp(
        &self,
        field: &'static str,
    ) -> Result<Option<DateTime<Utc>>, DecodeError> {
        match self.first(&[field]) {
            None => Ok(None),
            Some(Value::String(s)) => parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| DecodeError::invalid(field, format!("bad timestamp {:?}", s))),
            Some(other) => Err(DecodeError::invalid(field, format!("unexpected {}", other))),
        }
    }
}
