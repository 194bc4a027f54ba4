use std::sync::Arc;

use viua_asm::{load_immediate, ops, Access, RawInstruction, INSTRUCTION_SIZE};
use viua_vm::{Core, Module, Value, TIMEOUT_INFINITY};

/// Build a module with `main/0` first and `echo/0` second. `echo/0`
/// receives one message and returns it to whoever joins it.
fn echo_module() -> Arc<Module> {
    let mut module = Module::default();
    let mut text: Vec<RawInstruction> = Vec::new();

    // main/0
    text.push(ops::allocate_registers(Access::local(8)).encode());
    let li_at = text.len();
    text.push(0); // function table offset of echo/0, patched below
    text.push(ops::frame(Access::argument(0)).encode());
    text.push(ops::actor(Access::local(4), Access::local(1)).encode());
    text.push(ops::addi(Access::local(5), Access::void(), 7).encode());
    text.push(ops::send(Access::local(4), Access::local(5)).encode());
    text.push(ops::join(Access::local(6), Access::local(4)).encode());
    text.push(ops::ret(Access::local(6)).encode());

    // echo/0
    let echo_entry = text.len() as u64 * INSTRUCTION_SIZE as u64;
    text.push(ops::allocate_registers(Access::local(4)).encode());
    text.push(
        ops::receive(Access::local(1), Access::void(), TIMEOUT_INFINITY)
            .encode(),
    );
    text.push(ops::ret(Access::local(1)).encode());

    module.functions.push("main/0", 0);
    let echo_offset = module.functions.push("echo/0", echo_entry);
    let li = load_immediate(1, echo_offset, false);
    assert_eq!(li.len(), 1);
    text[li_at] = li[0];

    module.text = text;
    Arc::new(module)
}

#[test]
fn a_message_round_trips_through_a_spawned_process() {
    let mut core = Core::new();
    let pid = core.spawn(echo_module(), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(7))));
}

#[test]
fn self_yields_a_pid_a_process_can_message() {
    // main sends itself a value, then receives it back.
    let mut module = Module::default();
    module.text = vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::self_pid(Access::local(1)).encode(),
        ops::addi(Access::local(2), Access::void(), 11).encode(),
        ops::send(Access::local(1), Access::local(2)).encode(),
        ops::receive(Access::local(3), Access::void(), TIMEOUT_INFINITY)
            .encode(),
        ops::ret(Access::local(3)).encode(),
    ];
    module.functions.push("main/0", 0);

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(module), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(11))));
}

#[test]
fn messages_from_one_sender_arrive_in_order() {
    let mut module = Module::default();
    module.text = vec![
        ops::allocate_registers(Access::local(8)).encode(),
        ops::self_pid(Access::local(1)).encode(),
        ops::addi(Access::local(2), Access::void(), 1).encode(),
        ops::send(Access::local(1), Access::local(2)).encode(),
        ops::addi(Access::local(2), Access::void(), 2).encode(),
        ops::send(Access::local(1), Access::local(2)).encode(),
        // First receive must yield the first send.
        ops::receive(Access::local(3), Access::void(), TIMEOUT_INFINITY)
            .encode(),
        ops::ret(Access::local(3)).encode(),
    ];
    module.functions.push("main/0", 0);

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(module), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(1))));
}

#[test]
fn receive_with_a_zero_timeout_raises_mailbox_empty() {
    let mut module = Module::default();
    module.text = vec![
        ops::allocate_registers(Access::local(2)).encode(),
        ops::receive(Access::local(1), Access::void(), 0).encode(),
        ops::ret(Access::void()).encode(),
    ];
    module.functions.push("main/0", 0);

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(module), "main/0").unwrap();
    core.run().unwrap();
    assert!(core.result_of(pid).unwrap().is_err());
}

#[test]
fn mailbox_empty_is_catchable() {
    let mut module = Module::default();
    module.text = vec![
        ops::allocate_registers(Access::local(4)).encode(),
        ops::tr().encode(),
        ops::receive(Access::local(1), Access::void(), 0).encode(),
        ops::leave().encode(),
        ops::draw(Access::local(2)).encode(),
        ops::addi(Access::local(3), Access::void(), 1).encode(),
        ops::ret(Access::local(3)).encode(),
    ];
    module.functions.push("main/0", 0);

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(module), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(1))));
}

#[test]
fn join_reraises_the_exception_of_a_failed_process() {
    let mut module = Module::default();
    let mut text: Vec<RawInstruction> = Vec::new();

    // main/0: spawn fail/0, join it; the child's exception unwinds here.
    text.push(ops::allocate_registers(Access::local(8)).encode());
    let li_at = text.len();
    text.push(0);
    text.push(ops::frame(Access::argument(0)).encode());
    text.push(ops::actor(Access::local(4), Access::local(1)).encode());
    text.push(ops::tr().encode());
    text.push(ops::join(Access::local(5), Access::local(4)).encode());
    text.push(ops::leave().encode());
    text.push(ops::draw(Access::local(6)).encode());
    text.push(ops::ret(Access::local(6)).encode());

    // fail/0: throw 99.
    let fail_entry = text.len() as u64 * INSTRUCTION_SIZE as u64;
    text.push(ops::allocate_registers(Access::local(2)).encode());
    text.push(ops::addi(Access::local(1), Access::void(), 99).encode());
    text.push(ops::throw(Access::local(1)).encode());

    module.functions.push("main/0", 0);
    let fail_offset = module.functions.push("fail/0", fail_entry);
    let li = load_immediate(1, fail_offset, false);
    assert_eq!(li.len(), 1);
    text[li_at] = li[0];
    module.text = text;

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(module), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(99))));
}

#[test]
fn greedy_sends_are_delivered_together() {
    // The producer stages three sends inside one greedy bundle. The
    // mailbox router runs between cycles, so the consumer observes either
    // none or all of them: a partially-applied bundle is never visible.
    let mut module = Module::default();
    let mut text: Vec<RawInstruction> = Vec::new();

    // main/0: spawn producer with own pid as the target, then collect
    // three messages and return the last.
    text.push(ops::allocate_registers(Access::local(8)).encode());
    let li_at = text.len();
    text.push(0);
    text.push(ops::frame(Access::argument(1)).encode());
    text.push(ops::self_pid(Access::argument(0)).encode());
    text.push(ops::actor(Access::local(4), Access::local(1)).encode());
    text.push(
        ops::receive(Access::local(5), Access::void(), TIMEOUT_INFINITY)
            .encode(),
    );
    text.push(
        ops::receive(Access::local(5), Access::void(), TIMEOUT_INFINITY)
            .encode(),
    );
    text.push(
        ops::receive(Access::local(5), Access::void(), TIMEOUT_INFINITY)
            .encode(),
    );
    text.push(ops::ret(Access::local(5)).encode());

    // producer/1: three sends as one atomic bundle.
    let producer_entry = text.len() as u64 * INSTRUCTION_SIZE as u64;
    text.push(ops::allocate_registers(Access::local(8)).encode());
    text.push(
        ops::copy(Access::local(1), Access::parameter(0)).encode_greedy(),
    );
    text.push(
        ops::addi(Access::local(2), Access::void(), 1).encode_greedy(),
    );
    text.push(
        ops::send(Access::local(1), Access::local(2)).encode_greedy(),
    );
    text.push(
        ops::addi(Access::local(2), Access::void(), 2).encode_greedy(),
    );
    text.push(
        ops::send(Access::local(1), Access::local(2)).encode_greedy(),
    );
    text.push(
        ops::addi(Access::local(2), Access::void(), 3).encode_greedy(),
    );
    text.push(ops::send(Access::local(1), Access::local(2)).encode());
    text.push(ops::ret(Access::void()).encode());

    module.functions.push("main/0", 0);
    let producer_offset = module.functions.push("producer/1", producer_entry);
    let li = load_immediate(1, producer_offset, false);
    assert_eq!(li.len(), 1);
    text[li_at] = li[0];
    module.text = text;

    let mut core = Core::new();
    let pid = core.spawn(Arc::new(module), "main/0").unwrap();
    core.run().unwrap();
    assert_eq!(core.result_of(pid), Some(&Ok(Value::Int(3))));
}
