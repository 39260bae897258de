use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

/// A generated painting (always PNG) plus the letter written for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardResult {
    pub image: Vec<u8>,
    pub letter: String,
}

/// Transport form of [`RewardResult`] with the PNG base64-encoded.
#[derive(Debug, Clone, Serialize)]
pub struct RewardPayload {
    pub image: String,
    pub letter: String,
}

impl RewardResult {
    pub fn image_base64(&self) -> String {
        BASE64.encode(&self.image)
    }

    pub fn to_payload(&self) -> RewardPayload {
        RewardPayload {
            image: self.image_base64(),
            letter: self.letter.clone(),
        }
    }
}
