//! Wire messages exchanged over the transport

use alloy_primitives::{hex, B256, U256};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{AssetPair, MessageError, MessageResult, Price};

/// Topic carrying signed price observations
pub const PRICE_TOPIC: &str = "price";

/// Codec for messages published on a transport topic
pub trait Message: Sized {
    fn marshal(&self) -> MessageResult<Vec<u8>>;
    fn unmarshal(data: &[u8]) -> MessageResult<Self>;
}

/// A signed price as broadcast by a feeder
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMessage {
    pub price: Price,
    /// Per-origin prices behind the observation, carried verbatim
    pub trace: Option<serde_json::Value>,
    pub version: String,
}

impl PriceMessage {
    pub fn new(price: Price) -> Self {
        Self {
            price,
            trace: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_trace(mut self, trace: serde_json::Value) -> Self {
        self.trace = Some(trace);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePrice {
    wat: String,
    /// Decimal string so the value survives JSON without float rounding
    val: String,
    age: i64,
    v: String,
    r: String,
    s: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePriceMessage {
    price: WirePrice,
    #[serde(default)]
    trace: Option<serde_json::Value>,
    #[serde(default)]
    version: String,
}

impl From<&Price> for WirePrice {
    fn from(price: &Price) -> Self {
        Self {
            wat: price.asset_pair.to_string(),
            val: price.val.to_string(),
            age: price.age.timestamp(),
            v: format!("{:02x}", price.v),
            r: hex::encode(price.r),
            s: hex::encode(price.s),
        }
    }
}

fn decode_word(field: &str, value: &str) -> MessageResult<B256> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| MessageError::Decode(format!("{field}: {e}")))?;
    if bytes.len() != 32 {
        return Err(MessageError::Decode(format!(
            "{field}: expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

impl TryFrom<WirePrice> for Price {
    type Error = MessageError;

    fn try_from(wire: WirePrice) -> MessageResult<Self> {
        let val = U256::from_str_radix(&wire.val, 10)
            .map_err(|e| MessageError::Decode(format!("val {:?}: {e}", wire.val)))?;
        if wire.age < 0 {
            return Err(MessageError::Decode(format!(
                "age before the unix epoch: {}",
                wire.age
            )));
        }
        let age = Utc
            .timestamp_opt(wire.age, 0)
            .single()
            .ok_or_else(|| MessageError::Decode(format!("age out of range: {}", wire.age)))?;
        let v = u8::from_str_radix(wire.v.trim_start_matches("0x"), 16)
            .map_err(|e| MessageError::Decode(format!("v {:?}: {e}", wire.v)))?;

        Ok(Price {
            asset_pair: AssetPair::new(wire.wat),
            val,
            age,
            v,
            r: decode_word("r", &wire.r)?,
            s: decode_word("s", &wire.s)?,
        })
    }
}

impl Message for PriceMessage {
    fn marshal(&self) -> MessageResult<Vec<u8>> {
        let wire = WirePriceMessage {
            price: WirePrice::from(&self.price),
            trace: self.trace.clone(),
            version: self.version.clone(),
        };
        serde_json::to_vec(&wire).map_err(|e| MessageError::Encode(e.to_string()))
    }

    fn unmarshal(data: &[u8]) -> MessageResult<Self> {
        let wire: WirePriceMessage =
            serde_json::from_slice(data).map_err(|e| MessageError::Decode(e.to_string()))?;

        Ok(Self {
            price: Price::try_from(wire.price)?,
            trace: wire.trace,
            version: wire.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{wad, PriceSigner};

    fn signed_price() -> Price {
        let signer = PriceSigner::from_slice(&[9u8; 32]).unwrap();
        let age = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut price = Price::new("ETHUSD", wad(1234) + U256::from(1u64), age);
        signer.sign(&mut price).unwrap();
        price
    }

    #[test]
    fn test_val_is_encoded_as_decimal_string() {
        let message = PriceMessage::new(signed_price());
        let json: serde_json::Value =
            serde_json::from_slice(&message.marshal().unwrap()).unwrap();

        assert_eq!(json["price"]["wat"], "ETHUSD");
        assert_eq!(json["price"]["val"], "1234000000000000000001");
        assert_eq!(json["price"]["r"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_decoded_price_keeps_signer() {
        let price = signed_price();
        let expected = price.signer_address().unwrap();
        let message = PriceMessage::new(price).with_trace(serde_json::json!({"binance": "1234"}));

        let decoded = PriceMessage::unmarshal(&message.marshal().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.price.signer_address().unwrap(), expected);
    }

    #[test]
    fn test_negative_val_rejected() {
        let data = br#"{"price":{"wat":"ETHUSD","val":"-1","age":1,"v":"1b","r":"00","s":"00"}}"#;
        assert!(matches!(
            PriceMessage::unmarshal(data),
            Err(MessageError::Decode(_))
        ));
    }

    #[test]
    fn test_short_signature_word_rejected() {
        let data = br#"{"price":{"wat":"ETHUSD","val":"1","age":1,"v":"1b","r":"00","s":"00"}}"#;
        let err = PriceMessage::unmarshal(data).unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn test_pre_epoch_age_rejected() {
        let encoded = PriceMessage::new(signed_price()).marshal().unwrap();
        let mut wire: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        wire["price"]["age"] = serde_json::json!(-1_700_000_000i64);

        let err = PriceMessage::unmarshal(&serde_json::to_vec(&wire).unwrap()).unwrap_err();
        assert!(err.to_string().contains("before the unix epoch"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(PriceMessage::unmarshal(b"not json").is_err());
    }
}
