use crate::*;

fn t_instruction() -> Instruction {
    ops::add(Access::local(1), Access::local(2), Access::parameter(3))
}

#[test]
fn register_access_round_trip() {
    let access = Access {
        set: RegisterSet::Local,
        direct: true,
        index: 0xff,
    };
    assert_eq!(Access::decode(access.encode()).unwrap(), access);

    let void = Access::void();
    assert_eq!(Access::decode(void.encode()).unwrap(), void);
}

#[test]
fn non_canonical_void_access_is_illegal() {
    // set = void, direct = false, index = 1
    let raw = 0x0001u16;
    assert_eq!(
        Access::decode(raw),
        Err(EncodingError::IllegalRegisterAccess(raw))
    );
}

#[test]
fn unknown_register_set_is_rejected() {
    // set = 7
    let raw = 0x0e00u16 | 0x0100;
    assert!(matches!(
        Access::decode(raw),
        Err(EncodingError::InvalidRegisterSet(_))
    ));
}

#[test]
fn opcode_format_field_is_consistent() {
    use strum::IntoEnumIterator;
    for opcode in Opcode::iter() {
        let raw = opcode as OpcodeRepr;
        assert_eq!(Opcode::try_from(raw), Ok(opcode));
        assert_eq!(Format::of(raw), Some(opcode.format()));
        assert_eq!(Opcode::from_mnemonic(opcode.mnemonic()), Some(opcode));
    }
}

#[test]
fn greedy_flag_is_not_part_of_the_opcode() {
    let word = t_instruction().encode_greedy();
    assert!(is_greedy(word));
    assert_eq!(opcode_of(word), Opcode::Add as OpcodeRepr);
    assert_eq!(Instruction::decode(word).unwrap(), t_instruction());
}

#[test]
fn e_format_round_trips_a_36_bit_immediate() {
    let instruction = ops::luiu(Access::local(1), 0x0f_dead_beef);
    assert_eq!(
        Instruction::decode(instruction.encode()).unwrap(),
        instruction
    );
}

#[test]
fn r_format_round_trips_a_24_bit_immediate() {
    for immediate in [0u32, 1, 0xffff, 0x0f_0000, 0xf0_0000, 0xff_ffff] {
        let instruction =
            ops::addi(Access::local(1), Access::void(), immediate);
        assert_eq!(
            Instruction::decode(instruction.encode()).unwrap(),
            instruction
        );
    }
}

#[test]
fn m_format_round_trips_immediate_and_spec() {
    let instruction =
        ops::sm(Access::local(1), Access::local(2), 0xbeef, 0xa5);
    assert_eq!(
        Instruction::decode(instruction.encode()).unwrap(),
        instruction
    );
}

#[test]
fn unknown_opcode_fails_to_decode() {
    // Format field says S, ordinal is unused.
    let raw = 0x003fu64;
    assert_eq!(
        Instruction::decode(raw),
        Err(EncodingError::InvalidOpcode(0x003f))
    );
    // Format field itself is unknown.
    let raw = 0x0ff0u64;
    assert_eq!(
        Instruction::decode(raw),
        Err(EncodingError::InvalidOpcode(0x0ff0))
    );
}

#[test]
fn loading_parts_of_a_small_value_skip_the_multiplier() {
    let parts = to_loading_parts(42);
    assert_eq!(parts.high, 0);
    assert_eq!(parts.base, 42);
    assert_eq!(parts.multiplier, 0);
}

#[test]
fn loading_parts_recombine() {
    for value in [
        0u64,
        1,
        0x00be_dead,
        0x0000_0000_dead_beef,
        0xdead_beef_d0ad_beef,
        0xdead_beef_dead_beef,
        0xffff_ffff_ffff_ffff,
    ] {
        let parts = to_loading_parts(value);
        let low = (parts.base as u64 * parts.multiplier.max(1) as u64)
            + parts.remainder as u64;
        assert_eq!((parts.high << 28) | low, value, "{value:#018x}");
        assert!(parts.base <= 0x00ff_ffff);
        assert!(parts.remainder < 16);
    }
}

#[test]
fn load_immediate_emits_one_greedy_bundle() {
    let words = load_immediate(1, 0xdead_beef_dead_beef, false);
    let (last, rest) = words.split_last().unwrap();
    assert!(!is_greedy(*last));
    assert!(rest.iter().all(|w| is_greedy(*w)));
    // Wide low part: lui + decomposed low.
    assert_eq!(words.len(), 7);

    let words = load_immediate(1, 42, false);
    assert_eq!(words.len(), 1);
    assert!(!is_greedy(words[0]));
}
