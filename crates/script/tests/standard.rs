use blockidx_script::opcodes::{Builder, OP_CHECKMULTISIG, OP_CHECKSIG, OP_RETURN};
use blockidx_script::standard::{classify_script_pubkey, is_valid_pubkey, multisig};
use blockidx_script::AddressType;

fn classify(script: &[u8]) -> AddressType {
    classify_script_pubkey(script, true, true)
}

#[test]
fn classify_p2pkh() {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[0x11; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    assert_eq!(classify(&script), AddressType::PubkeyHash);
}

#[test]
fn classify_p2sh_depends_on_activation() {
    let mut script = vec![0xa9, 0x14];
    script.extend_from_slice(&[0x22; 20]);
    script.push(0x87);
    assert_eq!(classify(&script), AddressType::ScriptHash);
    assert_eq!(
        classify_script_pubkey(&script, false, true),
        AddressType::Nonstandard
    );
}

#[test]
fn classify_witness_programs() {
    let mut wpkh = vec![0x00, 0x14];
    wpkh.extend_from_slice(&[0x33; 20]);
    assert_eq!(classify(&wpkh), AddressType::WitnessPubkeyHash);

    let mut wsh = vec![0x00, 0x20];
    wsh.extend_from_slice(&[0x44; 32]);
    assert_eq!(classify(&wsh), AddressType::WitnessScriptHash);
    assert_eq!(
        classify_script_pubkey(&wsh, true, false),
        AddressType::Nonstandard
    );

    let mut v0_odd = vec![0x00, 0x10];
    v0_odd.extend_from_slice(&[0x55; 16]);
    assert_eq!(classify(&v0_odd), AddressType::Nonstandard);

    let mut taproot = vec![0x51, 0x20];
    taproot.extend_from_slice(&[0x66; 32]);
    assert_eq!(classify(&taproot), AddressType::WitnessUnknown);
}

#[test]
fn classify_p2pk_requires_valid_header() {
    let mut script = vec![33];
    script.extend_from_slice(&[0x02; 33]);
    script.push(OP_CHECKSIG);
    assert_eq!(classify(&script), AddressType::Pubkey);

    script[1] = 0x05;
    assert_eq!(classify(&script), AddressType::Nonstandard);
}

#[test]
fn classify_null_data() {
    let script = Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(b"hello")
        .into_bytes();
    assert_eq!(classify(&script), AddressType::NullData);

    let truncated = vec![OP_RETURN, 0x05, 0x01];
    assert_eq!(classify(&truncated), AddressType::Nonstandard);
}

#[test]
fn multisig_counts_must_agree() {
    let key = [0x03; 33];
    let good = Builder::new()
        .push_int(2)
        .push_slice(&key)
        .push_slice(&key)
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_bytes();
    let (required, keys) = multisig(&good).expect("2-of-2");
    assert_eq!(required, 2);
    assert_eq!(keys.len(), 2);

    let over = Builder::new()
        .push_int(3)
        .push_slice(&key)
        .push_slice(&key)
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_bytes();
    assert_eq!(classify(&over), AddressType::Nonstandard);

    let miscount = Builder::new()
        .push_int(1)
        .push_slice(&key)
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_bytes();
    assert_eq!(classify(&miscount), AddressType::Nonstandard);
}

#[test]
fn pubkey_validity_by_header() {
    assert!(is_valid_pubkey(&[0x02; 33]));
    assert!(is_valid_pubkey(&[0x04; 65]));
    assert!(is_valid_pubkey(&[0x07; 65]));
    assert!(!is_valid_pubkey(&[0x04; 33]));
    assert!(!is_valid_pubkey(&[]));
}
