/// Concrete values pulled from the live debuggee whenever the engine needs them

use log::trace;

use crate::concolic::executor::Engine;
use crate::debugger::Debugger;

// Drops the cached pages first so that writes done by the debuggee are seen
pub fn need_concrete_memory_value(debugger: &mut dyn Debugger, address: u64, size: usize) -> Option<Vec<u8>> {
    let bytes = debugger.read_memory(address, size, true)?;
    trace!("Concrete memory 0x{:x} ({} bytes) = {:02x?}", address, size, bytes);
    Some(bytes)
}

pub fn need_concrete_register_value(debugger: &mut dyn Debugger, name: &str) -> Option<u64> {
    let value = debugger.register_value(name);
    match value {
        Some(v) => trace!("Concrete register {} = 0x{:x}", name, v),
        None => trace!("Register {} cannot be read from the debugger", name),
    }
    value
}

pub fn install(engine: &mut Engine) {
    engine.add_memory_callback(Box::new(need_concrete_memory_value));
    engine.add_register_callback(Box::new(need_concrete_register_value));
}
