//! IPNS record and routing-key helpers.

use cid::Cid;
use multihash::Multihash;
use prost::Message;

/// Multicodec for libp2p public keys; IPNS names render as CIDv1 of this
/// codec in base36.
const LIBP2P_KEY_CODEC: u64 = 0x72;

/// The value field of an IPNS record on the wire. Remaining record fields
/// (signatures, validity, sequence) are skipped on decode.
#[derive(Clone, PartialEq, ::prost::Message)]
struct IpnsRecordWire {
    #[prost(bytes = "vec", tag = "1")]
    value: Vec<u8>,
}

/// Pull the `/ipfs/...` target out of a serialized IPNS record, if present.
pub fn extract_ipfs_path_from_record(record: &[u8]) -> Option<String> {
    let wire = IpnsRecordWire::decode(record).ok()?;
    let value = String::from_utf8(wire.value).ok()?;
    value.starts_with("/ipfs/").then_some(value)
}

/// Derive `/ipns/<name>` from a full routing key (`/ipns/` + peer id bytes).
///
/// The key must be raw bytes, not a lossy UTF-8 rendering of them.
pub fn name_from_routing_key(key: &[u8]) -> Option<String> {
    let suffix = key.strip_prefix(b"/ipns/")?;
    name_from_peer_id_bytes(suffix)
}

/// Derive `/ipns/<name>` from bare peer id bytes (a multihash).
pub fn name_from_peer_id_bytes(peer_id: &[u8]) -> Option<String> {
    if peer_id.is_empty() {
        return None;
    }
    let mh = Multihash::<64>::from_bytes(peer_id).ok()?;
    let cid = Cid::new_v1(LIBP2P_KEY_CODEC, mh);
    let name = cid.to_string_of_base(multibase::Base::Base36Lower).ok()?;
    Some(format!("/ipns/{name}"))
}

/// Encode a record for tests and fixtures.
#[cfg(test)]
pub fn encode_record(value: &str) -> Vec<u8> {
    IpnsRecordWire { value: value.as_bytes().to_vec() }.encode_to_vec()
}
