// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Opaque bearer tokens.
//!
//! A token binds exactly one user or group. The plaintext is
//! `{nonce-hex}:{marker}/{id}` where the marker is `uid` or `groupid`; it is
//! sealed with AES-GCM (key size chosen by key length, 16/24/32 bytes), the
//! random IV is prefixed to the ciphertext and the whole is base64 encoded.
//!
//! Decoding fails closed: any malformed or undecryptable input is
//! [`AuthError::TokenInvalid`], including the empty string.

use aes_gcm::{
	aead::{consts::U12, Aead, KeyInit},
	aes::Aes192,
	Aes128Gcm, Aes256Gcm, AesGcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{AuthError, AuthResult};
use crate::types::{GroupId, PrincipalRef, UserId};

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Size of the random nonce mixed into every token.
pub const TOKEN_NONCE_LEN: usize = 8;

/// Size of the AES-GCM initialization vector prefixed to the ciphertext.
pub const IV_LEN: usize = 12;

const TAG_LEN: usize = 16;
const USER_MARKER: &str = "uid";
const GROUP_MARKER: &str = "groupid";

enum TokenCipher {
	Aes128(Aes128Gcm),
	Aes192(Aes192Gcm),
	Aes256(Aes256Gcm),
}

impl TokenCipher {
	fn from_key(key: &[u8]) -> AuthResult<Self> {
		let invalid = |_| AuthError::InvalidArgument(format!("invalid token key length: {}", key.len()));
		match key.len() {
			16 => Aes128Gcm::new_from_slice(key).map(Self::Aes128).map_err(invalid),
			24 => Aes192Gcm::new_from_slice(key).map(Self::Aes192).map_err(invalid),
			32 => Aes256Gcm::new_from_slice(key).map(Self::Aes256).map_err(invalid),
			len => Err(AuthError::InvalidArgument(format!(
				"token key must be 16, 24 or 32 bytes, got {len}"
			))),
		}
	}

	fn seal(&self, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
		let nonce = Nonce::<U12>::from_slice(iv);
		match self {
			Self::Aes128(c) => c.encrypt(nonce, plaintext),
			Self::Aes192(c) => c.encrypt(nonce, plaintext),
			Self::Aes256(c) => c.encrypt(nonce, plaintext),
		}
	}

	fn open(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
		let nonce = Nonce::<U12>::from_slice(iv);
		match self {
			Self::Aes128(c) => c.decrypt(nonce, ciphertext),
			Self::Aes192(c) => c.decrypt(nonce, ciphertext),
			Self::Aes256(c) => c.decrypt(nonce, ciphertext),
		}
	}
}

/// Encodes and decodes bearer tokens under one symmetric key.
pub struct TokenCodec {
	cipher: TokenCipher,
}

impl std::fmt::Debug for TokenCodec {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TokenCodec").finish_non_exhaustive()
	}
}

impl TokenCodec {
	/// Builds a codec. The key must be 16, 24 or 32 bytes.
	pub fn new(key: &[u8]) -> AuthResult<Self> {
		Ok(Self {
			cipher: TokenCipher::from_key(key)?,
		})
	}

	/// Issues a token for exactly one of `user_id` / `group_id`.
	pub fn encode(&self, user_id: Option<UserId>, group_id: Option<GroupId>) -> AuthResult<String> {
		let (marker, id) = match (user_id, group_id) {
			(Some(user), None) => (USER_MARKER, user.to_string()),
			(None, Some(group)) => (GROUP_MARKER, group.to_string()),
			(Some(_), Some(_)) => {
				return Err(AuthError::InvalidArgument(
					"token must bind a user or a group, not both".to_string(),
				))
			}
			(None, None) => {
				return Err(AuthError::InvalidArgument(
					"token must bind a user or a group".to_string(),
				))
			}
		};

		let mut nonce = [0u8; TOKEN_NONCE_LEN];
		OsRng.fill_bytes(&mut nonce);
		let plaintext = Zeroizing::new(format!("{}:{marker}/{id}", hex::encode(nonce)));

		let mut iv = [0u8; IV_LEN];
		OsRng.fill_bytes(&mut iv);
		let ciphertext = self
			.cipher
			.seal(&iv, plaintext.as_bytes())
			.map_err(|e| AuthError::Crypto(format!("token encryption failed: {e}")))?;

		let mut sealed = Vec::with_capacity(IV_LEN + ciphertext.len());
		sealed.extend_from_slice(&iv);
		sealed.extend_from_slice(&ciphertext);
		Ok(STANDARD.encode(sealed))
	}

	/// Recovers the principal bound to `token`.
	pub fn decode(&self, token: &str) -> AuthResult<PrincipalRef> {
		if token.is_empty() {
			return Err(AuthError::TokenInvalid);
		}
		let sealed = STANDARD
			.decode(token.as_bytes())
			.map_err(|_| AuthError::TokenInvalid)?;
		if sealed.len() < IV_LEN + TAG_LEN {
			return Err(AuthError::TokenInvalid);
		}
		let (iv, ciphertext) = sealed.split_at(IV_LEN);
		let plaintext = Zeroizing::new(
			self
				.cipher
				.open(iv, ciphertext)
				.map_err(|_| AuthError::TokenInvalid)?,
		);
		let plaintext = std::str::from_utf8(&plaintext).map_err(|_| AuthError::TokenInvalid)?;
		parse_plaintext(plaintext)
	}
}

fn parse_plaintext(plaintext: &str) -> AuthResult<PrincipalRef> {
	let parts: Vec<&str> = plaintext.split(':').collect();
	let [nonce, subject] = parts.as_slice() else {
		return Err(AuthError::TokenInvalid);
	};
	match hex::decode(nonce) {
		Ok(bytes) if bytes.len() == TOKEN_NONCE_LEN => {}
		_ => return Err(AuthError::TokenInvalid),
	}

	let parts: Vec<&str> = subject.split('/').collect();
	let [marker, id] = parts.as_slice() else {
		return Err(AuthError::TokenInvalid);
	};
	match *marker {
		USER_MARKER => id
			.parse::<UserId>()
			.map(PrincipalRef::User)
			.map_err(|_| AuthError::TokenInvalid),
		GROUP_MARKER => id
			.parse::<GroupId>()
			.map(PrincipalRef::Group)
			.map_err(|_| AuthError::TokenInvalid),
		_ => Err(AuthError::TokenInvalid),
	}
}

/// Issues a token with a one-off codec.
pub fn encode_token(
	user_id: Option<UserId>,
	group_id: Option<GroupId>,
	key: &[u8],
) -> AuthResult<String> {
	TokenCodec::new(key)?.encode(user_id, group_id)
}

/// Decodes a token with a one-off codec.
pub fn decode_token(token: &str, key: &[u8]) -> AuthResult<PrincipalRef> {
	TokenCodec::new(key)?.decode(token)
}
