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

//! Submarine swap scripts: an on-chain HTLC with a payment-hash claim
//! branch and a CLTV refund branch, wrapped as P2WSH.

use amplify::{Slice32, Wrapper};
use bitcoin::blockdata::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUAL,
    OP_EQUALVERIFY, OP_HASH160, OP_IF, OP_SIZE,
};
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::{ripemd160, Hash};
use bitcoin::{Address, Network, Script, Witness};
use secp256k1::PublicKey;

/// Parameters of one submarine swap.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SwapScript {
    /// SHA-256 payment hash shared with the lightning invoice
    pub payment_hash: Slice32,

    /// Key allowed to claim with the preimage
    pub claim_pubkey: PublicKey,

    /// Key allowed to refund after the locktime
    pub refund_pubkey: PublicKey,

    /// Absolute height unlocking the refund branch
    pub locktime: u32,
}

impl SwapScript {
    /// The redeem script:
    ///
    /// ```text
    /// OP_SIZE 32 OP_EQUAL
    /// OP_IF
    ///   OP_HASH160 <RIPEMD160(payment_hash)> OP_EQUALVERIFY <claim_pubkey>
    /// OP_ELSE
    ///   OP_DROP <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP <refund_pubkey>
    /// OP_ENDIF
    /// OP_CHECKSIG
    /// ```
    pub fn redeem_script(&self) -> Script {
        let hash160 =
            ripemd160::Hash::hash(self.payment_hash.as_inner());
        Builder::new()
            .push_opcode(OP_SIZE)
            .push_int(32)
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_HASH160)
            .push_slice(&hash160.into_inner())
            .push_opcode(OP_EQUALVERIFY)
            .push_slice(&self.claim_pubkey.serialize())
            .push_opcode(OP_ELSE)
            .push_opcode(OP_DROP)
            .push_int(self.locktime as i64)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_slice(&self.refund_pubkey.serialize())
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// P2WSH address of the swap output.
    pub fn address(&self, network: Network) -> Address {
        Address::p2wsh(&self.redeem_script(), network)
    }

    /// Witness claiming the swap with the preimage:
    /// `<sig> <preimage> <script>`.
    pub fn claim_witness(
        &self,
        signature: &[u8],
        preimage: &Slice32,
    ) -> Witness {
        Witness::from_vec(vec![
            signature.to_vec(),
            preimage.as_inner().to_vec(),
            self.redeem_script().to_bytes(),
        ])
    }

    /// Witness refunding the swap after the locktime: `<sig> <> <script>`.
    pub fn refund_witness(&self, signature: &[u8]) -> Witness {
        Witness::from_vec(vec![
            signature.to_vec(),
            vec![],
            self.redeem_script().to_bytes(),
        ])
    }
}

/// Fee for a spend of `base_size` non-witness bytes plus
/// `witness_weight` weight units, at `feerate_per_kvb` satoshi per 1000
/// virtual bytes, rounded up.
pub fn estimate_fee(
    base_size: usize,
    witness_weight: usize,
    feerate_per_kvb: u64,
) -> u64 {
    let weight = base_size as u64 * 4 + witness_weight as u64;
    let vsize = (weight + 3) / 4;
    (vsize * feerate_per_kvb + 999) / 1000
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::sha256;
    use secp256k1::{SecretKey, SECP256K1};

    use super::*;

    fn swap() -> SwapScript {
        let claim_sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let refund_sk = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let preimage = [0x42u8; 32];
        SwapScript {
            payment_hash: Slice32::from_inner(
                sha256::Hash::hash(&preimage).into_inner(),
            ),
            claim_pubkey: PublicKey::from_secret_key(SECP256K1, &claim_sk),
            refund_pubkey: PublicKey::from_secret_key(
                SECP256K1, &refund_sk,
            ),
            locktime: 820_000,
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    #[test]
    fn script_structure() {
        let swap = swap();
        let bytes = swap.redeem_script().to_bytes();
        assert_eq!(bytes[0], OP_SIZE.into_u8());
        assert_eq!(*bytes.last().unwrap(), OP_CHECKSIG.into_u8());
        assert!(contains(&bytes, &swap.claim_pubkey.serialize()));
        assert!(contains(&bytes, &swap.refund_pubkey.serialize()));
        assert!(contains(
            &bytes,
            &ripemd160::Hash::hash(swap.payment_hash.as_inner())
                .into_inner(),
        ));
    }

    #[test]
    fn addresses_use_network_hrp() {
        let swap = swap();
        assert!(swap
            .address(Network::Bitcoin)
            .to_string()
            .starts_with("bc1q"));
        assert!(swap
            .address(Network::Testnet)
            .to_string()
            .starts_with("tb1q"));
    }

    #[test]
    fn witness_shapes() {
        let swap = swap();
        let signature = vec![0x30u8; 71];
        let preimage = Slice32::from_inner([0x42; 32]);

        let claim = swap.claim_witness(&signature, &preimage);
        let claim: Vec<&[u8]> = claim.iter().collect();
        assert_eq!(claim.len(), 3);
        assert_eq!(claim[1].len(), 32);
        assert_eq!(claim[2], swap.redeem_script().as_bytes());

        let refund = swap.refund_witness(&signature);
        let refund: Vec<&[u8]> = refund.iter().collect();
        assert_eq!(refund.len(), 3);
        assert!(refund[1].is_empty());
    }

    #[test]
    fn fee_estimation_rounds_up() {
        // 100 base bytes, 300 witness weight -> 175 vbytes
        assert_eq!(estimate_fee(100, 300, 1000), 175);
        // sub-kvb feerates round up to the next satoshi
        assert_eq!(estimate_fee(100, 300, 1001), 176);
        // witness-only weight contributes a quarter
        assert_eq!(estimate_fee(0, 4, 1000), 1);
    }
}
