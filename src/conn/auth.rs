// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Authentication plugins.
//!
//! A plugin turns the server nonce and the password into the bytes sent during the
//! authentication exchange. Plugins are looked up by the name the server announces, so
//! applications can register their own in an [`AuthPluginRegistry`].

use mysql_common::scramble::{scramble_native, scramble_sha256};

use std::{collections::HashMap, fmt, sync::Arc};

use crate::error::AuthError;

pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";

const FAST_AUTH_SUCCESS: u8 = 0x03;
const PERFORM_FULL_AUTH: u8 = 0x04;

/// What a plugin knows about the exchange it takes part in.
#[derive(Clone, Copy)]
pub struct AuthContext<'a> {
    pub nonce: &'a [u8],
    pub password: Option<&'a str>,
    /// The transport is encrypted, a cleartext password may be sent.
    pub secure: bool,
}

impl AuthContext<'_> {
    fn password_bytes(&self) -> &[u8] {
        self.password.map(str::as_bytes).unwrap_or_default()
    }

    fn cleartext_password(&self) -> Vec<u8> {
        let mut out = self.password_bytes().to_vec();
        out.push(0);
        out
    }
}

impl fmt::Debug for AuthContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("nonce", &self.nonce)
            .field("password", &self.password.map(|_| "..."))
            .field("secure", &self.secure)
            .finish()
    }
}

/// Plugin reaction to an auth-more-data (`0x01`) packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    Send(Vec<u8>),
    /// Nothing to send, the server will reply on its own.
    Wait,
}

pub trait AuthPlugin: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Auth response sent with the handshake response or after a plugin switch.
    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>, AuthError>;

    /// Handles plugin-specific data from the server.
    fn on_more_data(&self, data: &[u8], ctx: &AuthContext<'_>) -> Result<AuthAction, AuthError> {
        let _ = (data, ctx);
        Err(AuthError::UnexpectedAuthData {
            plugin: self.name().to_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NativePassword;

impl AuthPlugin for NativePassword {
    fn name(&self) -> &str {
        MYSQL_NATIVE_PASSWORD
    }

    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>, AuthError> {
        let nonce = &ctx.nonce[..ctx.nonce.len().min(20)];
        Ok(scramble_native(nonce, ctx.password_bytes())
            .map(|x| x.to_vec())
            .unwrap_or_default())
    }
}

/// `caching_sha2_password` without the RSA key exchange. Full authentication therefore needs
/// a secure transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachingSha2Password;

impl AuthPlugin for CachingSha2Password {
    fn name(&self) -> &str {
        CACHING_SHA2_PASSWORD
    }

    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>, AuthError> {
        let nonce = &ctx.nonce[..ctx.nonce.len().min(20)];
        Ok(scramble_sha256(nonce, ctx.password_bytes())
            .map(|x| x.to_vec())
            .unwrap_or_default())
    }

    fn on_more_data(&self, data: &[u8], ctx: &AuthContext<'_>) -> Result<AuthAction, AuthError> {
        match data.first() {
            Some(&FAST_AUTH_SUCCESS) => Ok(AuthAction::Wait),
            Some(&PERFORM_FULL_AUTH) if ctx.secure => {
                Ok(AuthAction::Send(ctx.cleartext_password()))
            }
            Some(&PERFORM_FULL_AUTH) => Err(AuthError::InsecureFullAuth {
                plugin: CACHING_SHA2_PASSWORD.into(),
            }),
            _ => Err(AuthError::UnexpectedAuthData {
                plugin: CACHING_SHA2_PASSWORD.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearPassword;

impl AuthPlugin for ClearPassword {
    fn name(&self) -> &str {
        MYSQL_CLEAR_PASSWORD
    }

    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>, AuthError> {
        if ctx.secure {
            Ok(ctx.cleartext_password())
        } else {
            Err(AuthError::InsecureFullAuth {
                plugin: MYSQL_CLEAR_PASSWORD.into(),
            })
        }
    }
}

/// Plugins by name.
#[derive(Debug, Clone)]
pub struct AuthPluginRegistry {
    plugins: HashMap<String, Arc<dyn AuthPlugin>>,
}

impl AuthPluginRegistry {
    pub fn empty() -> Self {
        AuthPluginRegistry {
            plugins: HashMap::new(),
        }
    }

    /// Adds `plugin`, replacing any plugin registered under the same name.
    pub fn register(&mut self, plugin: Arc<dyn AuthPlugin>) -> &mut Self {
        self.plugins.insert(plugin.name().to_owned(), plugin);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn AuthPlugin>, AuthError> {
        self.plugins
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::UnknownPlugin(name.to_owned()))
    }
}

impl Default for AuthPluginRegistry {
    fn default() -> Self {
        let mut registry = AuthPluginRegistry::empty();
        registry
            .register(Arc::new(NativePassword))
            .register(Arc::new(CachingSha2Password))
            .register(Arc::new(ClearPassword));
        registry
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const NONCE: [u8; 20] = [
        0x4e, 0x52, 0x33, 0x48, 0x50, 0x3a, 0x71, 0x49, 0x59, 0x61, 0x5f, 0x39, 0x3d, 0x64, 0x62,
        0x3f, 0x53, 0x64, 0x7b, 0x60,
    ];

    fn ctx(secure: bool) -> AuthContext<'static> {
        AuthContext {
            nonce: &NONCE,
            password: Some("G!ider27"),
            secure,
        }
    }

    #[test]
    fn should_compute_scrambled_password() {
        let registry = AuthPluginRegistry::default();
        let native = registry.resolve(MYSQL_NATIVE_PASSWORD).unwrap();
        assert_eq!(
            native.initial_response(&ctx(false)).unwrap(),
            vec![
                0x09, 0xcf, 0xf8, 0x85, 0x5e, 0x9e, 0x70, 0x53, 0x40, 0xff, 0x22, 0x70, 0xd8,
                0xfb, 0x9f, 0xad, 0xba, 0x90, 0x6b, 0x70,
            ]
        );
        let sha2 = registry.resolve(CACHING_SHA2_PASSWORD).unwrap();
        assert_eq!(
            sha2.initial_response(&ctx(false)).unwrap(),
            vec![
                0x4f, 0x97, 0xbb, 0xfd, 0x20, 0x24, 0x01, 0xc4, 0x2a, 0x69, 0xde, 0xaa, 0xe5,
                0x3b, 0xda, 0x07, 0x7e, 0xd7, 0x57, 0x85, 0x63, 0xc1, 0xa8, 0x0e, 0xb8, 0x16,
                0xc8, 0x21, 0x19, 0xb6, 0x8d, 0x2e,
            ]
        );
    }

    #[test]
    fn should_send_empty_response_without_password() {
        let ctx = AuthContext {
            nonce: &NONCE,
            password: None,
            secure: false,
        };
        assert!(NativePassword.initial_response(&ctx).unwrap().is_empty());
        assert!(CachingSha2Password.initial_response(&ctx).unwrap().is_empty());
    }

    #[test]
    fn should_follow_caching_sha2_fast_and_full_paths() {
        let plugin = CachingSha2Password;
        assert_eq!(
            plugin.on_more_data(&[0x03], &ctx(false)).unwrap(),
            AuthAction::Wait
        );
        assert_eq!(
            plugin.on_more_data(&[0x04], &ctx(true)).unwrap(),
            AuthAction::Send(b"G!ider27\0".to_vec())
        );
        assert_eq!(
            plugin.on_more_data(&[0x04], &ctx(false)).unwrap_err(),
            AuthError::InsecureFullAuth {
                plugin: CACHING_SHA2_PASSWORD.into()
            }
        );
    }

    #[test]
    fn should_refuse_cleartext_over_insecure_transport() {
        assert!(ClearPassword.initial_response(&ctx(false)).is_err());
        assert_eq!(
            ClearPassword.initial_response(&ctx(true)).unwrap(),
            b"G!ider27\0"
        );
    }

    #[test]
    fn should_resolve_plugins_by_name() {
        let mut registry = AuthPluginRegistry::empty();
        assert_eq!(
            registry.resolve("mysql_native_password").unwrap_err(),
            AuthError::UnknownPlugin("mysql_native_password".into())
        );
        registry.register(Arc::new(NativePassword));
        assert_eq!(
            registry.resolve("mysql_native_password").unwrap().name(),
            MYSQL_NATIVE_PASSWORD
        );
        assert!(NativePassword.on_more_data(&[1], &ctx(false)).is_err());
    }
}
