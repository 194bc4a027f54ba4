use proptest::prelude::*;
use rstest::rstest;
use strum::IntoEnumIterator;
use viua_asm::{
    ops, Access, Format, Instruction, Opcode, RegisterSet, D, E, F, M, R, S,
    T,
};

fn access_strategy() -> impl Strategy<Value = Access> {
    prop_oneof![
        Just(Access::void()),
        (1u8..=6, any::<bool>(), any::<u8>()).prop_map(|(set, direct, index)| {
            Access {
                set: RegisterSet::try_from(set).unwrap(),
                direct,
                index,
            }
        }),
    ]
}

fn opcode_of_format(format: Format) -> impl Strategy<Value = Opcode> {
    let all: Vec<Opcode> = Opcode::iter()
        .filter(move |op| op.format() == format)
        .collect();
    prop::sample::select(all)
}

proptest! {
    #[test]
    fn s_format_round_trips(
        opcode in opcode_of_format(Format::S),
        out in access_strategy(),
    ) {
        let instruction = Instruction::S(S { opcode, out });
        prop_assert_eq!(
            Instruction::decode(instruction.encode()).unwrap(),
            instruction
        );
    }

    #[test]
    fn d_format_round_trips(
        opcode in opcode_of_format(Format::D),
        out in access_strategy(),
        input in access_strategy(),
    ) {
        let instruction = Instruction::D(D { opcode, out, input });
        prop_assert_eq!(
            Instruction::decode(instruction.encode()).unwrap(),
            instruction
        );
    }

    #[test]
    fn t_format_round_trips(
        opcode in opcode_of_format(Format::T),
        out in access_strategy(),
        lhs in access_strategy(),
        rhs in access_strategy(),
    ) {
        let instruction = Instruction::T(T { opcode, out, lhs, rhs });
        prop_assert_eq!(
            Instruction::decode(instruction.encode()).unwrap(),
            instruction
        );
    }

    #[test]
    fn f_format_round_trips(
        out in access_strategy(),
        immediate in any::<u32>(),
    ) {
        let instruction = Instruction::F(F {
            opcode: Opcode::Float,
            out,
            immediate,
        });
        prop_assert_eq!(
            Instruction::decode(instruction.encode()).unwrap(),
            instruction
        );
    }

    #[test]
    fn e_format_round_trips(
        opcode in opcode_of_format(Format::E),
        out in access_strategy(),
        immediate in 0u64..(1 << 36),
    ) {
        let instruction = Instruction::E(E { opcode, out, immediate });
        prop_assert_eq!(
            Instruction::decode(instruction.encode()).unwrap(),
            instruction
        );
    }

    #[test]
    fn r_format_round_trips(
        opcode in opcode_of_format(Format::R),
        out in access_strategy(),
        input in access_strategy(),
        immediate in 0u32..(1 << 24),
    ) {
        let instruction = Instruction::R(R { opcode, out, input, immediate });
        prop_assert_eq!(
            Instruction::decode(instruction.encode()).unwrap(),
            instruction
        );
    }

    #[test]
    fn m_format_round_trips(
        opcode in opcode_of_format(Format::M),
        out in access_strategy(),
        input in access_strategy(),
        immediate in any::<u16>(),
        spec in any::<u8>(),
    ) {
        let instruction = Instruction::M(M {
            opcode,
            out,
            input,
            immediate,
            spec,
        });
        prop_assert_eq!(
            Instruction::decode(instruction.encode()).unwrap(),
            instruction
        );
    }
}

#[test]
fn every_opcode_round_trips_through_its_own_format() {
    let out = Access::local(1);
    let input = Access::local(2);
    let rhs = Access::local(3);

    for opcode in Opcode::iter() {
        let instruction = match opcode.format() {
            Format::N => Instruction::N(viua_asm::N { opcode }),
            Format::S => Instruction::S(S { opcode, out }),
            Format::D => Instruction::D(D { opcode, out, input }),
            Format::T => Instruction::T(T {
                opcode,
                out,
                lhs: input,
                rhs,
            }),
            Format::F => Instruction::F(F {
                opcode,
                out,
                immediate: 0x4048_f5c3,
            }),
            Format::E => Instruction::E(E {
                opcode,
                out,
                immediate: 0x0dead_beef,
            }),
            Format::R => Instruction::R(R {
                opcode,
                out,
                input,
                immediate: 0x00ab_cdef,
            }),
            Format::M => Instruction::M(M {
                opcode,
                out,
                input,
                immediate: 0x1234,
                spec: 3,
            }),
        };
        let raw = instruction.encode();
        assert_eq!(
            Instruction::decode(raw).unwrap(),
            instruction,
            "{opcode}: {raw:#018x}"
        );
        assert_eq!(instruction.opcode(), opcode);
    }
}

#[rstest]
#[case(0, &[0])]
#[case(1, &[1])]
#[case(0x00be_dead, &[0x00be_dead])]
fn small_values_load_in_a_single_word(
    #[case] value: u64,
    #[case] expected_imm: &[u32],
) {
    let words = viua_asm::load_immediate(1, value, false);
    assert_eq!(words.len(), expected_imm.len());
    match Instruction::decode(words[0]).unwrap() {
        Instruction::R(r) => {
            assert_eq!(r.opcode, Opcode::Addiu);
            assert_eq!(r.immediate, expected_imm[0]);
            assert!(r.input.is_void());
        }
        other => panic!("expected an addiu word, got {other:?}"),
    }
}

#[test]
fn wide_values_load_through_the_decomposition() {
    let words = viua_asm::load_immediate(1, 0xdead_beef_dead_beef, true);
    let decoded: Vec<Opcode> = words
        .iter()
        .map(|w| Instruction::decode(*w).unwrap().opcode())
        .collect();
    assert_eq!(
        decoded,
        vec![
            Opcode::Lui,
            Opcode::Addi,
            Opcode::Addi,
            Opcode::Mul,
            Opcode::Addi,
            Opcode::Add,
            Opcode::Add,
        ]
    );
}

#[test]
fn constructors_pick_the_documented_formats() {
    assert_eq!(
        ops::add(Access::local(0), Access::local(1), Access::local(2))
            .opcode()
            .format(),
        Format::T
    );
    assert_eq!(ops::ret(Access::void()).opcode().format(), Format::S);
    assert_eq!(
        ops::call(Access::void(), Access::local(0)).opcode().format(),
        Format::D
    );
    assert_eq!(
        ops::branch(Access::local(1), Access::void(), 8).opcode().format(),
        Format::R
    );
}
