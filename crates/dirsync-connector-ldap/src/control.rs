//! LDAP controls and entry decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ldap3::controls::RawControl;
use ldap3::SearchEntry;

use dirsync_connector::ExternalRecord;

/// OID of the Persistent Search control.
pub const PERSISTENT_SEARCH_OID: &str = "2.16.840.1.113730.3.4.3";

/// Change types reported by a persistent search.
pub mod change_type {
    pub const ADD: u8 = 1;
    pub const DELETE: u8 = 2;
    pub const MODIFY: u8 = 4;
    pub const MODDN: u8 = 8;
    pub const ALL: u8 = ADD | DELETE | MODIFY | MODDN;
    /// Changes that leave the entry in place. Removals are left to
    /// full-sync reconciliation.
    pub const SURVIVING: u8 = ADD | MODIFY | MODDN;
}

/// Build a Persistent Search request control.
///
/// With `changes_only` set the server skips the initial result set and only
/// sends entries as they change.
pub fn persistent_search(change_types: u8, changes_only: bool, return_ecs: bool) -> RawControl {
    RawControl {
        ctype: PERSISTENT_SEARCH_OID.to_string(),
        crit: true,
        val: Some(encode_persistent_search(change_types, changes_only, return_ecs)),
    }
}

/// Persistent Search control used by the change listener.
pub fn change_listen_control() -> RawControl {
    persistent_search(change_type::SURVIVING, true, false)
}

/// BER encoding of
/// `SEQUENCE { changeTypes INTEGER, changesOnly BOOLEAN, returnECs BOOLEAN }`.
fn encode_persistent_search(change_types: u8, changes_only: bool, return_ecs: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(10);
    // INTEGER content is two's complement, so values with the high bit set need a leading zero.
    if change_types & 0x80 != 0 {
        body.extend_from_slice(&[0x02, 0x02, 0x00, change_types]);
    } else {
        body.extend_from_slice(&[0x02, 0x01, change_types]);
    }
    body.extend_from_slice(&[0x01, 0x01, ber_bool(changes_only)]);
    body.extend_from_slice(&[0x01, 0x01, ber_bool(return_ecs)]);

    let mut encoded = Vec::with_capacity(body.len() + 2);
    encoded.push(0x30);
    encoded.push(body.len() as u8);
    encoded.extend(body);
    encoded
}

fn ber_bool(value: bool) -> u8 {
    if value {
        0xff
    } else {
        0x00
    }
}

/// Convert a search entry into an [`ExternalRecord`].
///
/// The identifier is the first value of `uid_attribute`, falling back to the
/// DN. Binary attributes (such as `objectGUID`) are carried base64-encoded.
pub fn record_from_entry(entry: SearchEntry, uid_attribute: &str) -> ExternalRecord {
    let SearchEntry {
        dn,
        attrs,
        bin_attrs,
    } = entry;

    let mut record = ExternalRecord::new(String::new(), dn);
    for (name, values) in attrs {
        record.attributes.insert(name, values);
    }
    for (name, values) in bin_attrs {
        let encoded = values.iter().map(|v| STANDARD.encode(v)).collect();
        record.attributes.insert(name, encoded);
    }

    let id = record
        .first(uid_attribute)
        .filter(|v| !v.is_empty())
        .map_or_else(|| record.dn.clone(), str::to_string);
    record.id = id;
    record
}
