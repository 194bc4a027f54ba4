use std::sync::Arc;

use rstest::rstest;
use viua_asm::{load_immediate, ops, Access, RawInstruction};
use viua_vm::{Core, Module, TraceStream, Value};

fn module_of(text: Vec<RawInstruction>) -> Arc<Module> {
    let mut module = Module::default();
    module.text = text;
    module.functions.push("main/0", 0);
    Arc::new(module)
}

fn run_main(text: Vec<RawInstruction>) -> Result<Value, Value> {
    let mut core = Core::new();
    let pid = core.spawn(module_of(text), "main/0").unwrap();
    core.run().unwrap();
    core.result_of(pid).unwrap().clone()
}

fn run_main_traced(text: Vec<RawInstruction>) -> (Result<Value, Value>, String) {
    let (trace, buffer) = TraceStream::to_buffer();
    let mut core = Core::with_trace(trace);
    let pid = core.spawn(module_of(text), "main/0").unwrap();
    core.run().unwrap();
    let result = core.result_of(pid).unwrap().clone();
    let trace = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    (result, trace)
}

#[test]
fn arithmetic_dispatches_on_the_left_operand() {
    let text = vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::addi(Access::local(1), Access::void(), 41).encode(),
        ops::addi(Access::local(2), Access::void(), 1).encode(),
        ops::add(Access::local(1), Access::local(1), Access::local(2)).encode(),
        ops::ret(Access::local(1)).encode(),
    ];
    assert_eq!(run_main(text), Ok(Value::Int(42)));
}

#[test]
fn division_by_zero_is_an_error() {
    let (result, trace) = run_main_traced(vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::addi(Access::local(1), Access::void(), 7).encode(),
        ops::addi(Access::local(2), Access::void(), 0).encode(),
        ops::div(Access::local(3), Access::local(1), Access::local(2)).encode(),
        ops::ret(Access::void()).encode(),
    ]);
    assert!(result.is_err());
    assert!(trace.contains("atom 'DivisionByZero'"), "{trace}");
}

#[test]
fn void_lhs_is_a_type_error_for_register_adds() {
    let (result, trace) = run_main_traced(vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::addi(Access::local(2), Access::void(), 1).encode(),
        ops::add(Access::local(1), Access::local(3), Access::local(2)).encode(),
        ops::ret(Access::void()).encode(),
    ]);
    assert!(result.is_err());
    assert!(trace.contains("atom 'TypeError'"), "{trace}");
}

#[test]
fn void_input_reads_as_zero_in_immediate_adds() {
    let result = run_main(vec![
        ops::allocate_registers(Access::local(2)).encode(),
        ops::addi(Access::local(1), Access::void(), 5).encode(),
        ops::ret(Access::local(1)).encode(),
    ]);
    assert_eq!(result, Ok(Value::Int(5)));
}

#[test]
fn writes_to_void_are_discarded() {
    let result = run_main(vec![
        ops::allocate_registers(Access::local(2)).encode(),
        ops::addi(Access::void(), Access::void(), 5).encode(),
        ops::addi(Access::local(1), Access::void(), 1).encode(),
        ops::ret(Access::local(1)).encode(),
    ]);
    assert_eq!(result, Ok(Value::Int(1)));
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(0x00be_dead)]
#[case(0x0000_0000_dead_beef)]
#[case(0xdead_beef_d0ad_beef)]
#[case(0xdead_beef_dead_beef)]
#[case(0xffff_ffff_ffff_ffff)]
fn load_immediate_materialises_wide_constants(#[case] value: u64) {
    let mut text = vec![ops::allocate_registers(Access::local(4)).encode()];
    text.extend(load_immediate(1, value, false));
    text.push(ops::ret(Access::local(1)).encode());
    assert_eq!(
        run_main(text),
        Ok(Value::Uint(value)),
        "loading {value:#018x}"
    );
}

#[test]
fn signed_load_immediate_produces_signed_integers() {
    let mut text = vec![ops::allocate_registers(Access::local(4)).encode()];
    text.extend(load_immediate(1, -42i64 as u64, true));
    text.push(ops::ret(Access::local(1)).encode());
    assert_eq!(run_main(text), Ok(Value::Int(-42)));
}

#[test]
fn a_cycle_executes_up_to_two_single_instructions() {
    let text = vec![
        ops::addi(Access::void(), Access::void(), 1).encode(),
        ops::addi(Access::void(), Access::void(), 2).encode(),
        ops::addi(Access::void(), Access::void(), 3).encode(),
        ops::halt().encode(),
    ];
    let mut core = Core::new();
    let pid = core.spawn(module_of(text), "main/0").unwrap();

    assert_eq!(core.cycle(pid), 2);
    assert_eq!(core.process_mut(pid).unwrap().stack.ip, 2);
}

#[test]
fn a_greedy_bundle_is_never_split_by_preemption() {
    // Five greedy-flagged words and their terminator: six instructions
    // that must execute in one cycle even though the threshold is two.
    let text = vec![
        ops::allocate_registers(Access::local(8)).encode_greedy(),
        ops::addi(Access::local(1), Access::void(), 1).encode_greedy(),
        ops::addi(Access::local(2), Access::void(), 2).encode_greedy(),
        ops::addi(Access::local(3), Access::void(), 3).encode_greedy(),
        ops::addi(Access::local(4), Access::void(), 4).encode_greedy(),
        ops::addi(Access::local(5), Access::void(), 5).encode(),
        ops::halt().encode(),
    ];
    let mut core = Core::new();
    let pid = core.spawn(module_of(text), "main/0").unwrap();

    assert_eq!(core.cycle(pid), 6);

    // All five registers were written before the yield: the bundle was
    // observed whole.
    let proc = core.process_mut(pid).unwrap();
    assert_eq!(proc.stack.ip, 6);
    for i in 1..=5u8 {
        assert_eq!(
            proc.stack.frames[0].registers[i as usize],
            Value::Int(i as i64)
        );
    }
}

#[test]
fn pointer_arithmetic_narrows_the_region() {
    // Allocate 8 bytes, derive +4 (size 4), then store one byte at the
    // last valid offset of the derived region.
    let result = run_main(vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::aa(Access::local(1), Access::void(), 1, 3).encode(),
        ops::addiu(Access::local(2), Access::local(1), 4).encode(),
        ops::addi(Access::local(3), Access::void(), 7).encode(),
        ops::sm(Access::local(3), Access::local(2), 3, 0).encode(),
        ops::lm(Access::local(3), Access::local(2), 3, 0).encode(),
        ops::ret(Access::local(3)).encode(),
    ]);
    assert_eq!(result, Ok(Value::Undefined([7, 0, 0, 0, 0, 0, 0, 0])));
}

#[test]
fn pointer_offset_at_the_region_size_is_out_of_bounds() {
    let (result, trace) = run_main_traced(vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::aa(Access::local(1), Access::void(), 1, 3).encode(),
        ops::addiu(Access::local(2), Access::local(1), 4).encode(),
        ops::addiu(Access::local(3), Access::local(2), 4).encode(),
        ops::ret(Access::void()).encode(),
    ]);
    assert!(result.is_err());
    assert!(trace.contains("atom 'BoundsError'"), "{trace}");
}

#[test]
fn derived_pointer_metadata_remembers_its_parent() {
    let text = vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::aa(Access::local(1), Access::void(), 2, 3).encode(),
        ops::addiu(Access::local(2), Access::local(1), 15).encode(),
        ops::noop().encode(),
        ops::noop().encode(),
        ops::halt().encode(),
    ];
    let mut core = Core::new();
    let pid = core.spawn(module_of(text), "main/0").unwrap();
    core.cycle(pid);
    core.cycle(pid);

    let proc = core.process_mut(pid).unwrap();
    let base = match proc.stack.frames[0].registers[1] {
        Value::Pointer(addr) => addr,
        other => panic!("expected a pointer, got {other:?}"),
    };
    let derived = proc.pointer_at(base + 15).unwrap();
    assert_eq!(derived.size, 1);
    assert_eq!(derived.parent, base);
}

#[test]
fn calls_pass_arguments_and_returns_carry_values_back() {
    // main/0: stage one argument, call double/1, return its result.
    // double/1: return parameter 0 added to itself.
    let mut module = Module::default();
    let main_entry = 0u64;
    let double_entry;

    let mut text = Vec::new();
    text.push(ops::allocate_registers(Access::local(4)).encode());
    text.push(ops::frame(Access::argument(1)).encode());
    text.push(ops::addi(Access::argument(0), Access::void(), 21).encode());
    // Function table offset of double/1 is loaded below, once known.
    let li_at = text.len();
    text.push(0);
    text.push(ops::call(Access::local(2), Access::local(1)).encode());
    text.push(ops::ret(Access::local(2)).encode());

    double_entry = text.len() as u64 * viua_asm::INSTRUCTION_SIZE as u64;
    text.push(ops::allocate_registers(Access::local(2)).encode());
    text.push(
        ops::add(Access::local(1), Access::parameter(0), Access::parameter(0))
            .encode(),
    );
    text.push(ops::ret(Access::local(1)).encode());

    module.functions.push("main/0", main_entry);
    let double_offset = module.functions.push("double/1", double_entry);
    let li = load_immediate(1, double_offset, false);
    assert_eq!(li.len(), 1, "offset should fit a single word");
    text[li_at] = li[0];
    module.text = text;

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(module), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(42))));
}

#[test]
fn uncaught_throws_kill_the_process() {
    let (result, _) = run_main_traced(vec![
        ops::allocate_registers(Access::local(2)).encode(),
        ops::addi(Access::local(1), Access::void(), 13).encode(),
        ops::throw(Access::local(1)).encode(),
        ops::ret(Access::void()).encode(),
    ]);
    assert_eq!(result, Err(Value::Int(13)));
}

#[test]
fn guarded_regions_catch_throws_and_draw_takes_the_value() {
    let result = run_main(vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::tr().encode(),
        ops::addi(Access::local(1), Access::void(), 13).encode(),
        ops::throw(Access::local(1)).encode(),
        // Skipped: the throw unwinds past the leave.
        ops::addi(Access::local(2), Access::void(), 99).encode(),
        ops::leave().encode(),
        ops::draw(Access::local(3)).encode(),
        ops::ret(Access::local(3)).encode(),
    ]);
    assert_eq!(result, Ok(Value::Int(13)));
}

#[test]
fn draw_without_a_caught_exception_yields_void() {
    let result = run_main(vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::tr().encode(),
        ops::leave().encode(),
        ops::draw(Access::local(1)).encode(),
        ops::addi(Access::local(2), Access::local(1), 1).encode(),
        ops::ret(Access::local(2)).encode(),
    ]);
    // The drawn void reads as zero for the immediate add.
    assert_eq!(result, Ok(Value::Int(1)));
}

#[test]
fn ebreak_dumps_registers_to_the_trace_stream() {
    let (_, trace) = run_main_traced(vec![
        ops::allocate_registers(Access::local(16)).encode(),
        ops::addi(Access::local(1), Access::void(), 41).encode(),
        ops::addi(Access::local(2), Access::void(), 1).encode(),
        ops::add(Access::local(1), Access::local(1), Access::local(2)).encode(),
        ops::ebreak().encode(),
        ops::addi(Access::local(0), Access::void(), 0).encode(),
        ops::ret(Access::local(0)).encode(),
    ]);
    assert!(
        trace.contains("[1.l] is 0x000000000000002a 42"),
        "{trace}"
    );
    assert!(trace.contains("[2.l] is 0x0000000000000001 1"), "{trace}");
}

#[test]
fn bit_rotations_are_circular_on_the_64_bit_view() {
    let mut text = vec![ops::allocate_registers(Access::local(4)).encode()];
    text.extend(load_immediate(1, 0x8000_0000_0000_0001, false));
    text.push(ops::addiu(Access::local(2), Access::void(), 1).encode());
    text.push(
        ops::bitrol(Access::local(1), Access::local(1), Access::local(2))
            .encode(),
    );
    text.push(ops::ret(Access::local(1)).encode());
    assert_eq!(run_main(text), Ok(Value::Uint(3)));

    let mut text = vec![ops::allocate_registers(Access::local(4)).encode()];
    text.extend(load_immediate(1, 0x8000_0000_0000_0001, false));
    text.push(ops::addiu(Access::local(2), Access::void(), 1).encode());
    text.push(
        ops::bitror(Access::local(1), Access::local(1), Access::local(2))
            .encode(),
    );
    text.push(ops::ret(Access::local(1)).encode());
    assert_eq!(run_main(text), Ok(Value::Uint(0xc000_0000_0000_0000)));
}

/// A module whose `main/0` schedules `dump/0` (a single `ebreak`) with
/// `defer` and then runs `body` as its remaining instructions.
fn deferring_module(body: Vec<RawInstruction>) -> Arc<Module> {
    let mut module = Module::default();
    let mut text = Vec::new();
    text.push(ops::allocate_registers(Access::local(4)).encode());
    let li_at = text.len();
    text.push(0);
    text.push(ops::frame(Access::argument(0)).encode());
    text.push(ops::defer(Access::local(1)).encode());
    text.extend(body);

    let dump_entry = text.len() as u64 * viua_asm::INSTRUCTION_SIZE as u64;
    text.push(ops::allocate_registers(Access::local(2)).encode());
    text.push(ops::ebreak().encode());
    text.push(ops::ret(Access::void()).encode());

    module.functions.push("main/0", 0);
    let dump_offset = module.functions.push("dump/0", dump_entry);
    let li = load_immediate(1, dump_offset, false);
    assert_eq!(li.len(), 1);
    text[li_at] = li[0];
    module.text = text;
    Arc::new(module)
}

#[test]
fn deferred_calls_run_when_the_frame_returns() {
    let module = deferring_module(vec![
        ops::addi(Access::local(2), Access::void(), 5).encode(),
        ops::ret(Access::local(2)).encode(),
    ]);
    let (trace, buffer) = TraceStream::to_buffer();
    let mut core = Core::with_trace(trace);
    let pid = core.spawn(module, "main/0").unwrap();
    core.run().unwrap();

    // The result is the frame's own return value; the deferred dump ran
    // on the way out.
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(5))));
    let trace = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(trace.contains("begin ebreak"), "{trace}");
}

#[test]
fn deferred_calls_run_during_unwind() {
    let module = deferring_module(vec![
        ops::addi(Access::local(2), Access::void(), 13).encode(),
        ops::throw(Access::local(2)).encode(),
    ]);
    let (trace, buffer) = TraceStream::to_buffer();
    let mut core = Core::with_trace(trace);
    let pid = core.spawn(module, "main/0").unwrap();
    core.run().unwrap();

    assert_eq!(core.result_of(pid), Some(&Err(Value::Int(13))));
    let trace = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(trace.contains("begin ebreak"), "{trace}");
    assert!(trace.contains("uncaught exception"), "{trace}");
}

#[test]
fn unimplemented_instructions_fail_fatally() {
    let (result, _) = run_main_traced(vec![
        ops::allocate_registers(Access::local(2)).encode(),
        ops::string(Access::local(1)).encode(),
        ops::ret(Access::void()).encode(),
    ]);
    assert!(result.is_err());
}
