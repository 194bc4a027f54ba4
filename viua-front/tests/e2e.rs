//! Whole-pipeline scenarios: assemble, load, execute, observe.

use std::sync::Arc;

use viua_front::{assemble, link, LinkError};
use viua_vm::{elf, Core, TraceStream, Value};

fn run_traced(source: &str) -> (Result<Value, Value>, String) {
    let assembled = assemble(source).unwrap();
    let (trace, buffer) = TraceStream::to_buffer();
    let mut core = Core::with_trace(trace);
    let pid = core
        .spawn(Arc::new(assembled.module), "main/0")
        .unwrap();
    core.run().unwrap();
    let result = core.result_of(pid).unwrap().clone();
    let trace = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    (result, trace)
}

#[test]
fn arithmetic_round_trip_dumps_through_ebreak() {
    let (result, trace) = run_traced(
        ".function: [[entry]] main/0\n\
         \x20 allocate_registers %16 local\n\
         \x20 integer %1 local 41\n\
         \x20 integer %2 local 1\n\
         \x20 add %1 local %1 local %2 local\n\
         \x20 ebreak\n\
         \x20 izero %0 local\n\
         \x20 return %0 local\n\
         .end\n",
    );
    assert_eq!(result, Ok(Value::Int(0)));
    assert!(
        trace.contains("[1.l] is 0x000000000000002a 42"),
        "{trace}"
    );
    assert!(trace.contains("[2.l] is 0x0000000000000001 1"), "{trace}");
}

#[test]
fn a_wide_constant_survives_the_li_decomposition() {
    let value = 0xdead_beef_dead_beefu64 as i64;
    let (result, _) = run_traced(&format!(
        ".function: main/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 integer %1 local {value}\n\
         \x20 return %1 local\n\
         .end\n"
    ));
    assert_eq!(result, Ok(Value::Int(value)));
}

#[test]
fn pointer_arithmetic_is_bounds_checked_end_to_end() {
    // Allocate 8 bytes, derive +4 (a 4-byte region), then step past it.
    let (result, trace) = run_traced(
        ".function: main/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 aa %1 local 1 3\n\
         \x20 addiu %2 local %1 local 4\n\
         \x20 addiu %3 local %2 local 4\n\
         \x20 return %3 local\n\
         .end\n",
    );
    assert!(result.is_err());
    assert!(trace.contains("atom 'BoundsError'"), "{trace}");
}

#[test]
fn a_message_round_trips_through_a_spawned_actor() {
    let (result, _) = run_traced(
        ".function: main/0\n\
         \x20 allocate_registers %8 local\n\
         \x20 frame %0 arguments\n\
         \x20 actor %1 local echo/0\n\
         \x20 integer %2 local 7\n\
         \x20 send %1 local %2 local\n\
         \x20 join %3 local %1 local\n\
         \x20 return %3 local\n\
         .end\n\
         .function: echo/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 receive %1 local infinity\n\
         \x20 return %1 local\n\
         .end\n",
    );
    assert_eq!(result, Ok(Value::Int(7)));
}

#[test]
fn branches_assemble_into_relative_offsets() {
    let (result, _) = run_traced(
        ".function: main/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 integer %1 local 1\n\
         \x20 if %1 local yes no\n\
         \x20 .mark: yes\n\
         \x20 integer %2 local 100\n\
         \x20 return %2 local\n\
         \x20 .mark: no\n\
         \x20 integer %2 local 200\n\
         \x20 return %2 local\n\
         .end\n",
    );
    assert_eq!(result, Ok(Value::Int(100)));
}

#[test]
fn atoms_intern_through_the_string_table() {
    let (result, trace) = run_traced(
        ".function: main/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 atom %1 local 'answer'\n\
         \x20 atom %2 local 'answer'\n\
         \x20 eq %3 local %1 local %2 local\n\
         \x20 ebreak\n\
         \x20 return %3 local\n\
         .end\n",
    );
    assert_eq!(result, Ok(Value::Uint(1)));
    assert!(trace.contains("atom 'answer'"), "{trace}");
}

#[test]
fn calls_pass_arguments_through_the_frame() {
    let (result, _) = run_traced(
        ".function: main/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 integer %1 local 21\n\
         \x20 frame %1 arguments\n\
         \x20 move %0 arguments %1 local\n\
         \x20 call %2 local twice/1\n\
         \x20 return %2 local\n\
         .end\n\
         .function: twice/1\n\
         \x20 allocate_registers %2 local\n\
         \x20 add %1 local %0 parameters %0 parameters\n\
         \x20 return %1 local\n\
         .end\n",
    );
    assert_eq!(result, Ok(Value::Int(42)));
}

#[test]
fn an_assembled_module_survives_the_elf_envelope() {
    let assembled = assemble(
        ".info: name \"round-trip\"\n\
         .function: main/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 integer %1 local 5\n\
         \x20 return %1 local\n\
         .end\n",
    )
    .unwrap();
    let stored = elf::store(&assembled.module);
    let loaded = elf::load(&stored).unwrap();
    assert_eq!(loaded, assembled.module);

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(loaded), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(5))));
}

#[test]
fn linking_resolves_extern_functions_across_modules() {
    let main_module = assemble(
        ".extern_function: twice/1\n\
         .function: main/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 integer %1 local 21\n\
         \x20 frame %1 arguments\n\
         \x20 move %0 arguments %1 local\n\
         \x20 call %2 local twice/1\n\
         \x20 return %2 local\n\
         .end\n",
    )
    .unwrap();
    let library = assemble(
        ".function: twice/1\n\
         \x20 allocate_registers %2 local\n\
         \x20 add %1 local %0 parameters %0 parameters\n\
         \x20 return %1 local\n\
         .end\n",
    )
    .unwrap();

    let linked = link(&[main_module, library], true).unwrap();

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(linked.module), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(42))));
}

#[test]
fn duplicate_symbols_fail_to_link() {
    let a = assemble(
        ".function: main/0\n\
         \x20 allocate_registers %2 local\n\
         \x20 izero %0 local\n\
         \x20 return\n\
         .end\n",
    )
    .unwrap();
    assert_eq!(
        link(&[a.clone(), a], true),
        Err(LinkError::DuplicateSymbol("main/0".into()))
    );
}

#[test]
fn missing_symbols_fail_to_link() {
    let a = assemble(
        ".extern_function: absent/0\n\
         .function: main/0\n\
         \x20 allocate_registers %2 local\n\
         \x20 frame %0 arguments\n\
         \x20 call void absent/0\n\
         \x20 return\n\
         .end\n",
    )
    .unwrap();
    assert_eq!(
        link(&[a], true),
        Err(LinkError::MissingSymbol("absent/0".into()))
    );
}

#[test]
fn executables_require_an_entry_function() {
    let a = assemble(
        ".function: helper/0\n\
         \x20 allocate_registers %2 local\n\
         \x20 izero %0 local\n\
         \x20 return\n\
         .end\n",
    )
    .unwrap();
    assert_eq!(link(&[a], true), Err(LinkError::NoMainFunction));
}

#[test]
fn deferred_calls_run_in_reverse_when_the_frame_returns() {
    // The worker schedules two deferred notifications; the most recently
    // scheduled one must arrive first.
    let (result, _) = run_traced(
        ".function: main/0\n\
         \x20 allocate_registers %8 local\n\
         \x20 .unused: %1\n\
         \x20 frame %1 arguments\n\
         \x20 self %0 arguments\n\
         \x20 actor %1 local worker/1\n\
         \x20 receive %2 local infinity\n\
         \x20 receive %3 local infinity\n\
         \x20 .unused: %3\n\
         \x20 return %2 local\n\
         .end\n\
         .function: worker/1\n\
         \x20 allocate_registers %4 local\n\
         \x20 frame %1 arguments\n\
         \x20 copy %0 arguments %0 parameters\n\
         \x20 defer send_one/1\n\
         \x20 frame %1 arguments\n\
         \x20 copy %0 arguments %0 parameters\n\
         \x20 defer send_two/1\n\
         \x20 izero %0 local\n\
         \x20 return\n\
         .end\n\
         .function: send_one/1\n\
         \x20 allocate_registers %4 local\n\
         \x20 integer %1 local 1\n\
         \x20 send %0 parameters %1 local\n\
         \x20 izero %0 local\n\
         \x20 return\n\
         .end\n\
         .function: send_two/1\n\
         \x20 allocate_registers %4 local\n\
         \x20 integer %1 local 2\n\
         \x20 send %0 parameters %1 local\n\
         \x20 izero %0 local\n\
         \x20 return\n\
         .end\n",
    );
    assert_eq!(result, Ok(Value::Int(2)));
}

#[test]
fn deferred_calls_run_when_an_exception_unwinds_the_frame() {
    let (result, _) = run_traced(
        ".function: main/0\n\
         \x20 allocate_registers %8 local\n\
         \x20 .unused: %1\n\
         \x20 frame %1 arguments\n\
         \x20 self %0 arguments\n\
         \x20 actor %1 local worker/1\n\
         \x20 receive %2 local infinity\n\
         \x20 return %2 local\n\
         .end\n\
         .function: worker/1\n\
         \x20 allocate_registers %4 local\n\
         \x20 frame %1 arguments\n\
         \x20 copy %0 arguments %0 parameters\n\
         \x20 defer send_one/1\n\
         \x20 integer %1 local 99\n\
         \x20 throw %1 local\n\
         .end\n\
         .function: send_one/1\n\
         \x20 allocate_registers %4 local\n\
         \x20 integer %1 local 1\n\
         \x20 send %0 parameters %1 local\n\
         \x20 izero %0 local\n\
         \x20 return\n\
         .end\n",
    );
    // The worker dies of the uncaught throw, but its deferred
    // notification still went out.
    assert_eq!(result, Ok(Value::Int(1)));
}

#[test]
fn a_caught_throw_resumes_after_the_guarded_region() {
    let (result, _) = run_traced(
        ".function: main/0\n\
         \x20 allocate_registers %4 local\n\
         \x20 try\n\
         \x20 integer %1 local 13\n\
         \x20 throw %1 local\n\
         \x20 leave\n\
         \x20 draw %2 local\n\
         \x20 return %2 local\n\
         .end\n",
    );
    assert_eq!(result, Ok(Value::Int(13)));
}
