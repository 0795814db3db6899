//! Property tests for the Partake crypto primitives.

use partake_crypto::{SessionKey, TransferNonce, compute_tag, derive_transfer_key, verify_tag};
use proptest::prelude::*;

proptest! {
    // decrypt(K, encrypt(K, P)) == P for arbitrary plaintexts and keys
    #[test]
    fn seal_open_roundtrip(key in prop::array::uniform32(any::<u8>()),
                           plaintext in prop::collection::vec(any::<u8>(), 0..4096)) {
        let key = SessionKey::new(key);
        let framed = key.seal(&mut rand_core::OsRng, &plaintext).unwrap();
        prop_assert_eq!(key.open(&framed).unwrap(), plaintext);
    }

    // verify(derive(K,N), D, compute(derive(K,N), D)) holds; flipping any
    // single byte of D breaks it
    #[test]
    fn tag_detects_any_flip(key in prop::array::uniform32(any::<u8>()),
                            nonce in prop::array::uniform16(any::<u8>()),
                            mut data in prop::collection::vec(any::<u8>(), 1..1024),
                            flip in any::<prop::sample::Index>()) {
        let key = SessionKey::new(key);
        let nonce = TransferNonce::from_base64(
            &partake_crypto::encoding::encode(&nonce)).unwrap();
        let mac_key = derive_transfer_key(&key, &nonce);

        let tag = compute_tag(&mac_key, &data);
        prop_assert!(verify_tag(&mac_key, &data, &tag));

        let i = flip.index(data.len());
        data[i] ^= 0x01;
        prop_assert!(!verify_tag(&mac_key, &data, &tag));
    }

    // truncated or corrupted framing never opens
    #[test]
    fn open_rejects_truncation(key in prop::array::uniform32(any::<u8>()),
                               plaintext in prop::collection::vec(any::<u8>(), 0..512),
                               cut in 1usize..28) {
        let key = SessionKey::new(key);
        let framed = key.seal(&mut rand_core::OsRng, &plaintext).unwrap();
        let truncated = &framed[..framed.len().saturating_sub(cut)];
        prop_assert!(key.open(truncated).is_err());
    }
}
