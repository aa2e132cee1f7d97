//! RFC 7636 proof-key verification for codes issued by the bridge.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// PKCE challenge transformation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PkceMethod {
	/// `BASE64URL(SHA256(verifier))`.
	#[default]
	S256,
	/// Challenge equals the verifier.
	#[serde(rename = "plain")]
	Plain,
}
impl PkceMethod {
	/// Returns the RFC 7636 identifier for the method.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::S256 => "S256",
			Self::Plain => "plain",
		}
	}
}
impl FromStr for PkceMethod {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"S256" => Ok(Self::S256),
			"plain" => Ok(Self::Plain),
			other => Err(Error::InvalidRequest {
				reason: format!("unsupported code_challenge_method `{other}`"),
			}),
		}
	}
}
impl Display for PkceMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Challenge bound to an authorization request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
	/// Challenge value sent by the downstream client.
	pub challenge: String,
	/// Transformation applied to the verifier.
	pub method: PkceMethod,
}
impl PkceChallenge {
	/// Creates a challenge with an explicit method.
	pub fn new(challenge: impl Into<String>, method: PkceMethod) -> Self {
		Self { challenge: challenge.into(), method }
	}

	/// Returns `true` when `verifier` transforms into the bound challenge.
	pub fn verify(&self, verifier: &str) -> bool {
		let derived = match self.method {
			PkceMethod::S256 => s256_challenge(verifier),
			PkceMethod::Plain => verifier.to_owned(),
		};

		constant_time_eq(derived.as_bytes(), self.challenge.as_bytes())
	}
}

/// Computes the S256 challenge for `verifier`.
pub fn s256_challenge(verifier: &str) -> String {
	let digest = Sha256::digest(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(digest)
}

fn constant_time_eq(lhs: &[u8], rhs: &[u8]) -> bool {
	if lhs.len() != rhs.len() {
		return false;
	}

	lhs.iter().zip(rhs).fold(0_u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
