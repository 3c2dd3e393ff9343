use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

#[derive(Serialize)]
struct Outgoing<'a, T> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
}

/// `{"name": ..., "data": ...}` as received, with `data` left undecoded
/// until the name has picked the payload type.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<'a> {
    pub name: String,
    #[serde(borrow, default)]
    pub data: Option<&'a RawValue>,
}

impl<'a> Envelope<'a> {
    pub fn parse(raw: &'a RawValue) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw.get())?)
    }

    pub fn data<T: serde::de::DeserializeOwned + Default>(&self) -> Result<T, Error> {
        match self.data {
            Some(data) => Ok(serde_json::from_str(data.get())?),
            None => Ok(T::default()),
        }
    }
}

pub(crate) fn encode<T: Serialize>(name: &str, data: Option<&T>) -> Result<Box<RawValue>, Error> {
    Ok(serde_json::value::to_raw_value(&Outgoing { name, data })?)
}
