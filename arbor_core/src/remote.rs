//! Encoding of remote configuration options into an ordered key/value map.
//!
//! Every field of [`RemoteOptions`] has a static directive naming its wire
//! key and whether a boolean is inverted on the wire. Fields left at their
//! default (empty string, `false`) are not emitted.

use serde::Serialize;

/// Options accepted when configuring a remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOptions {
    pub content_url: String,
    pub proxy: String,
    pub no_gpg_verify: bool,
    pub no_gpg_verify_summary: bool,
    pub tls_permissive: bool,
    pub tls_client_cert_path: String,
    pub tls_client_key_path: String,
    pub tls_ca_path: String,
    pub unconfigured_state: String,
    pub min_free_space_percent: String,
    pub collection_id: String,
}

/// A value in a [`WireMap`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WireValue {
    Bool(bool),
    Str(String),
}

/// Ordered wire keys and values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WireMap(Vec<(String, WireValue)>);

impl WireMap {
    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Entries in encoding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &WireValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys in encoding order.
    pub fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Number of encoded options.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when every option was left at its default.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A borrowed field value.
#[derive(Debug, Clone, Copy)]
enum Field<'a> {
    Bool(bool),
    Str(&'a str),
}

/// How one field reaches the wire.
struct Directive {
    wire_key: &'static str,
    invert: bool,
    read: for<'a> fn(&'a RemoteOptions) -> Field<'a>,
}

const DIRECTIVES: &[Directive] = &[
    Directive {
        wire_key: "contenturl",
        invert: false,
        read: |o| Field::Str(&o.content_url),
    },
    Directive {
        wire_key: "proxy",
        invert: false,
        read: |o| Field::Str(&o.proxy),
    },
    Directive {
        wire_key: "gpg-verify",
        invert: true,
        read: |o| Field::Bool(o.no_gpg_verify),
    },
    Directive {
        wire_key: "gpg-verify-summary",
        invert: true,
        read: |o| Field::Bool(o.no_gpg_verify_summary),
    },
    Directive {
        wire_key: "tls-permissive",
        invert: false,
        read: |o| Field::Bool(o.tls_permissive),
    },
    Directive {
        wire_key: "tls-client-cert-path",
        invert: false,
        read: |o| Field::Str(&o.tls_client_cert_path),
    },
    Directive {
        wire_key: "tls-client-key-path",
        invert: false,
        read: |o| Field::Str(&o.tls_client_key_path),
    },
    Directive {
        wire_key: "tls-ca-path",
        invert: false,
        read: |o| Field::Str(&o.tls_ca_path),
    },
    Directive {
        wire_key: "unconfigured-state",
        invert: false,
        read: |o| Field::Str(&o.unconfigured_state),
    },
    Directive {
        wire_key: "min-free-space-percent",
        invert: false,
        read: |o| Field::Str(&o.min_free_space_percent),
    },
    Directive {
        wire_key: "collection-id",
        invert: false,
        read: |o| Field::Str(&o.collection_id),
    },
];

impl RemoteOptions {
    /// Encode the non-default fields, in declaration order.
    pub fn encode(&self) -> WireMap {
        let mut out = Vec::new();

        for directive in DIRECTIVES {
            let value = match (directive.read)(self) {
                Field::Bool(false) => continue,
                Field::Bool(true) => WireValue::Bool(!directive.invert),
                Field::Str("") => continue,
                Field::Str(s) => WireValue::Str(s.to_string()),
            };
            out.push((directive.wire_key.to_string(), value));
        }

        WireMap(out)
    }
}
