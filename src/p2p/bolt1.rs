// Lightning network client core library
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! BOLT-1 setup and control messages.

use std::io;

use amplify::{Slice32, Wrapper};
use ln_wire::{TlvStream, WireDecode, WireEncode};

use super::{ChannelId, Features};

/// A ping whose `pong_size` is at least this value must not be answered;
/// it is a probe that explicitly asks for silence.
pub const PING_NO_PONG_THRESHOLD: u16 = 65532;

/// TLV type carrying the list of chain hashes a node is interested in.
const INIT_TLV_NETWORKS: u64 = 1;

/// Once authentication is complete, the first message reveals the features
/// supported or required by this node, even if this is a reconnection.
#[derive(Clone, PartialEq, Eq, Debug, Display, Default)]
#[display("init(...)")]
pub struct Init {
    /// Backwards-compatibility global feature flags
    pub global_features: Features,

    /// Feature flags of the node
    pub features: Features,

    /// Chains the node is interested in, as genesis block hashes
    pub networks: Option<Vec<Slice32>>,

    /// Unknown odd TLV records, preserved for re-serialization
    pub unknown_tlvs: TlvStream,
}

impl WireEncode for Init {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.global_features.wire_encode(&mut e)?;
        len += self.features.wire_encode(&mut e)?;
        let mut tlvs = self.unknown_tlvs.clone();
        if let Some(networks) = &self.networks {
            let mut value = Vec::with_capacity(networks.len() * 32);
            for chain in networks {
                value.extend_from_slice(chain.as_inner());
            }
            tlvs.insert(INIT_TLV_NETWORKS, value);
        }
        len += tlvs.wire_encode(&mut e)?;
        Ok(len)
    }
}

impl WireDecode for Init {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let global_features = Features::wire_decode(&mut d)?;
        let features = Features::wire_decode(&mut d)?;
        let mut tlvs = TlvStream::wire_decode(&mut d)?;
        let networks = match tlvs.take(INIT_TLV_NETWORKS) {
            None => None,
            Some(value) if value.len() % 32 == 0 => Some(
                value
                    .chunks(32)
                    .map(|chunk| {
                        let mut hash = [0u8; 32];
                        hash.copy_from_slice(chunk);
                        Slice32::from_inner(hash)
                    })
                    .collect(),
            ),
            Some(value) => {
                return Err(ln_wire::Error::DataIntegrityError(format!(
                    "networks TLV length {} is not a multiple of 32",
                    value.len()
                )))
            }
        };
        tlvs.reject_unknown_even()?;
        Ok(Init {
            global_features,
            features,
            networks,
            unknown_tlvs: tlvs,
        })
    }
}

/// For simplicity of diagnosis, it's often useful to tell a peer that
/// something is incorrect. An all-zero channel id refers to all channels
/// with the peer.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("error({channel_id}, ...)")]
pub struct Error {
    /// The channel the error applies to, or the wildcard id
    pub channel_id: ChannelId,

    /// Free-form diagnostic data, usually ASCII
    pub data: Vec<u8>,
}

impl Error {
    /// Lossy UTF-8 rendering of the diagnostic data.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Like [`Error`], but the connection and channels must not be closed.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("warning({channel_id}, ...)")]
pub struct Warning {
    /// The channel the warning applies to, or the wildcard id
    pub channel_id: ChannelId,

    /// Free-form diagnostic data, usually ASCII
    pub data: Vec<u8>,
}

impl Warning {
    /// Lossy UTF-8 rendering of the diagnostic data.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Keep-alive and traffic-obfuscation probe.
#[derive(Clone, PartialEq, Eq, Debug, Display, Default)]
#[display("ping({pong_size}, ...)")]
pub struct Ping {
    /// Number of bytes the pong reply must carry
    pub pong_size: u16,

    /// Ignored padding bytes
    pub ignored: Vec<u8>,
}

impl Ping {
    /// Builds the reply required by BOLT-1, or `None` when the ping asks
    /// for no reply.
    pub fn pong(&self) -> Option<Pong> {
        if self.pong_size >= PING_NO_PONG_THRESHOLD {
            return None;
        }
        Some(Pong {
            ignored: vec![0u8; self.pong_size as usize],
        })
    }
}

/// Reply to a [`Ping`].
#[derive(Clone, PartialEq, Eq, Debug, Display, Default)]
#[display("pong(...)")]
pub struct Pong {
    /// Ignored padding bytes whose length was requested by the ping
    pub ignored: Vec<u8>,
}

impl_wire_struct!(Error {
    channel_id,
    data
});
impl_wire_struct!(Warning {
    channel_id,
    data
});
impl_wire_struct!(Ping {
    pong_size,
    ignored
});
impl_wire_struct!(Pong { ignored });

#[cfg(test)]
mod test {
    use super::super::BITCOIN_CHAIN_HASH;
    use super::*;

    #[test]
    fn init_roundtrip_with_networks() {
        let mut features = Features::new();
        features.set(9);
        let init = Init {
            global_features: Features::new(),
            features,
            networks: Some(vec![*BITCOIN_CHAIN_HASH]),
            unknown_tlvs: TlvStream::new(),
        };
        let encoded = init.wire_serialize();
        assert_eq!(Init::wire_deserialize(encoded).unwrap(), init);
    }

    #[test]
    fn init_rejects_unknown_even_tlv() {
        let init = Init::default();
        let mut encoded = init.wire_serialize();
        // append TLV record of unknown even type 240
        encoded.extend_from_slice(&[240, 1, 0xAA]);
        assert_eq!(
            Init::wire_deserialize(encoded),
            Err(ln_wire::Error::TlvUnknownEvenType(240))
        );
    }

    #[test]
    fn ping_pong_rules() {
        let ping = Ping {
            pong_size: 4,
            ignored: vec![0; 2],
        };
        assert_eq!(ping.pong().unwrap().ignored.len(), 4);

        let quiet = Ping {
            pong_size: PING_NO_PONG_THRESHOLD,
            ignored: vec![],
        };
        assert_eq!(quiet.pong(), None);
    }

    #[test]
    fn error_message_text() {
        let error = Error {
            channel_id: ChannelId::default(),
            data: b"permanent channel failure".to_vec(),
        };
        assert!(error.channel_id.is_wildcard());
        assert_eq!(error.message(), "permanent channel failure");
    }
}
