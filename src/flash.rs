//! # Flash Messages
//!
//! One-shot error messages carried across the POST → redirect → GET cycle.
//!
//! ## How it works:
//! 1. A failed upload stores its message here under a fresh UUID
//! 2. The redirect sets a cookie holding only that UUID, signed with `SECRET_KEY`
//! 3. The next page render verifies the signature, takes the message out of
//!    the store and tells the browser to delete the cookie
//!
//! A message is shown at most once. Tampered or unknown cookies are ignored.
//!
//! A message leaves the store only when a render consumes it. Redirects the
//! browser never follows leave their entry behind for the life of the
//! process; `pending()` reports the count on `/health`.

use actix_web::cookie::{Cookie, CookieJar, Key, SameSite};
use actix_web::HttpRequest;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Name of the signed cookie that points at a pending message.
pub const FLASH_COOKIE: &str = "whisper_trans_flash";

/// `Key::derive_from` needs at least this much master material.
const MIN_KEY_MATERIAL: usize = 32;

pub struct FlashStore {
    key: Key,
    pending: Mutex<HashMap<Uuid, String>>,
}

impl FlashStore {
    /// Create a store whose cookies are signed with a key derived from `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            key: signing_key(secret),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Queue `message` and return the cookie that points at it.
    pub fn issue(&self, message: &str) -> Cookie<'static> {
        let id = Uuid::new_v4();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, message.to_string());

        let mut jar = CookieJar::new();
        jar.signed_mut(&self.key).add(base_cookie(id.to_string()));
        jar.get(FLASH_COOKIE)
            .cloned()
            .unwrap_or_else(|| base_cookie(String::new()))
    }

    /// Take the message the request's flash cookie points at, if any.
    pub fn consume(&self, req: &HttpRequest) -> Option<String> {
        let cookie = req.cookie(FLASH_COOKIE)?;
        let mut jar = CookieJar::new();
        jar.add_original(cookie);

        let verified = jar.signed(&self.key).get(FLASH_COOKIE);
        let Some(verified) = verified else {
            tracing::debug!("Ignoring flash cookie with a bad signature");
            return None;
        };

        let id = Uuid::parse_str(verified.value()).ok()?;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Messages issued but not yet shown.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Cookie that makes the browser forget the flash pointer.
pub fn removal_cookie() -> Cookie<'static> {
    let mut cookie = base_cookie(String::new());
    cookie.make_removal();
    cookie
}

fn base_cookie(value: String) -> Cookie<'static> {
    Cookie::build(FLASH_COOKIE, value)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}

/// Stretch `secret` to the length the key derivation requires.
fn signing_key(secret: &str) -> Key {
    let seed = if secret.is_empty() {
        crate::config::DEFAULT_SECRET_KEY
    } else {
        secret
    };

    let mut material = Vec::with_capacity(MIN_KEY_MATERIAL + seed.len());
    while material.len() < MIN_KEY_MATERIAL {
        material.extend_from_slice(seed.as_bytes());
    }
    Key::derive_from(&material)
}
