//! Runtime-core properties exercised through the public API.

use std::collections::HashMap;

use npa::vm::debug::{disassemble_chunk, jump_target};
use npa::vm::{GcRef, Heap, ObjString, Object, Table, hash_str};
use npa::{Chunk, Op, RuntimeConfig, VM, Value};

fn stress_vm() -> VM {
    VM::new_with_config(RuntimeConfig {
        stress_gc: true,
        ..Default::default()
    })
}

fn live_strings_with(vm: &VM, content: &str) -> usize {
    vm.heap()
        .iter()
        .filter(|(_, obj)| matches!(obj, Object::String(s) if s.as_str() == content))
        .count()
}

// ============================================================================
// Interning
// ============================================================================

#[test]
fn interning_yields_one_object_per_content() {
    let mut vm = VM::new();
    let mut handles = HashMap::new();
    for round in 0..3 {
        for i in 0..50 {
            let content = format!("ident{}", i);
            let r = if round % 2 == 0 {
                vm.copy_string(&content).unwrap()
            } else {
                vm.take_string(content.clone()).unwrap()
            };
            assert_eq!(*handles.entry(content).or_insert(r), r);
        }
    }
    for content in handles.keys() {
        assert_eq!(live_strings_with(&vm, content), 1);
    }
    assert_eq!(vm.strings().len(), 50);
}

#[test]
fn interning_survives_stress_collection_while_rooted() {
    let mut vm = stress_vm();
    let first = vm.copy_string("shared").unwrap();
    vm.push(Value::Obj(first)).unwrap();
    for i in 0..20 {
        vm.copy_string(&format!("garbage{}", i)).unwrap();
    }
    assert_eq!(vm.copy_string("shared").unwrap(), first);
    assert_eq!(live_strings_with(&vm, "shared"), 1);
}

// ============================================================================
// Table
// ============================================================================

fn keys(heap: &mut Heap, n: usize) -> Vec<GcRef> {
    (0..n)
        .map(|i| heap.insert(Object::String(ObjString::new(format!("key{}", i)))))
        .collect()
}

#[test]
fn table_matches_model_under_churn() {
    let mut heap = Heap::new();
    let keys = keys(&mut heap, 64);
    let mut table = Table::new();
    let mut model: HashMap<GcRef, f64> = HashMap::new();

    // Deterministic pseudo-random operation stream.
    let mut seed: u32 = 12345;
    for step in 0..5000 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        let key = keys[(seed >> 8) as usize % keys.len()];
        if seed % 3 == 0 {
            assert_eq!(table.delete(&heap, key), model.remove(&key).is_some());
        } else {
            let value = step as f64;
            assert_eq!(table.set(&heap, key, Value::Number(value)), model.insert(key, value).is_none());
            assert!(table.load() * 4 <= table.capacity() * 3);
        }
        assert_eq!(table.len(), model.len());
    }

    for &key in &keys {
        assert_eq!(table.get(&heap, key), model.get(&key).map(|&v| Value::Number(v)));
    }
}

#[test]
fn tombstones_do_not_hide_colliding_keys() {
    let mut heap = Heap::new();
    let keys = keys(&mut heap, 200);
    let mut table = Table::new();
    for &key in &keys {
        table.set(&heap, key, Value::Bool(true));
    }
    let capacity = table.capacity();

    // Find two keys that share a home slot at this capacity.
    let mut by_slot: HashMap<usize, GcRef> = HashMap::new();
    let (a, b) = keys
        .iter()
        .find_map(|&k| {
            let slot = heap.hash_of(k) as usize % capacity;
            by_slot.insert(slot, k).map(|prev| (prev, k))
        })
        .unwrap();

    assert!(table.delete(&heap, a));
    assert_eq!(table.get(&heap, b), Some(Value::Bool(true)));
    assert_eq!(table.get(&heap, a), None);

    // Reinserting reuses a slot without growing the table.
    assert!(table.set(&heap, a, Value::Nil));
    assert_eq!(table.capacity(), capacity);
    assert_eq!(table.get(&heap, a), Some(Value::Nil));
}

#[test]
fn find_string_compares_contents() {
    let mut vm = VM::new();
    let r = vm.copy_string("needle").unwrap();
    let heap = vm.heap();
    assert_eq!(vm.strings().find_string(heap, "needle", hash_str("needle")), Some(r));
    assert_eq!(vm.strings().find_string(heap, "haystack", hash_str("haystack")), None);
}

// ============================================================================
// Chunks
// ============================================================================

#[test]
fn chunk_growth_keeps_bytes_and_lines() {
    let mut chunk = Chunk::new();
    for i in 0..1000u32 {
        chunk.write((i % 251) as u8, i / 10 + 1);
    }
    assert_eq!(chunk.len(), 1000);
    assert!(chunk.capacity() >= 1000);
    for i in [0u32, 1, 499, 999] {
        assert_eq!(chunk.byte(i as usize), Some((i % 251) as u8));
        assert_eq!(chunk.line(i as usize), Some(i / 10 + 1));
    }
    assert_eq!(chunk.byte(1000), None);
}

#[test]
fn jump_operand_decodes_big_endian() {
    let mut chunk = Chunk::new();
    for _ in 0..10 {
        chunk.write_op(Op::Nil, 1);
    }
    chunk.write_op(Op::JumpIfFalse, 1);
    chunk.write(0x00, 1);
    chunk.write(0x05, 1);

    assert_eq!(jump_target(&chunk, 10), Some(18));
    let text = disassemble_chunk(&Heap::new(), &chunk, "jump");
    assert!(text.contains("OP_JUMP_IF_FALSE   10 -> 18"), "{}", text);
}

// ============================================================================
// Collection
// ============================================================================

#[test]
fn closed_upvalue_keeps_its_value_alive() {
    let mut vm = stress_vm();
    let function = vm.new_function(Some("holder"), 0).unwrap();
    vm.set_upvalue_count(function, 1).unwrap();
    let closure = vm.new_closure(function).unwrap();
    vm.push(Value::Obj(closure)).unwrap();

    let captured = vm.copy_string("captured").unwrap();
    vm.push(Value::Obj(captured)).unwrap();
    let upvalue = vm.capture_upvalue(1).unwrap();
    vm.set_closure_upvalue(closure, 0, upvalue).unwrap();
    vm.close_upvalues(1).unwrap();
    vm.pop().unwrap();

    vm.collect_garbage();
    for r in [closure, function, upvalue, captured] {
        assert!(vm.heap().contains(r));
    }
    assert_eq!(vm.upvalue_get(upvalue).unwrap(), Value::Obj(captured));
    assert_eq!(vm.string_chars(captured), Some("captured"));

    vm.pop().unwrap();
    vm.collect_garbage();
    for r in [closure, function, upvalue, captured] {
        assert!(!vm.heap().contains(r));
    }
    assert_eq!(live_strings_with(&vm, "captured"), 0);
    assert_eq!(live_strings_with(&vm, "holder"), 0);
}

#[test]
fn unreachable_closure_cycle_is_reclaimed() {
    let mut vm = VM::new();
    let function = vm.new_function(None, 0).unwrap();
    vm.set_upvalue_count(function, 1).unwrap();
    vm.push(Value::Obj(function)).unwrap();
    let a = vm.new_closure(function).unwrap();
    vm.push(Value::Obj(a)).unwrap();
    let b = vm.new_closure(function).unwrap();
    vm.push(Value::Obj(b)).unwrap();

    // a captures the slot holding b and b captures the slot holding a.
    let up_b = vm.capture_upvalue(2).unwrap();
    let up_a = vm.capture_upvalue(1).unwrap();
    vm.set_closure_upvalue(a, 0, up_b).unwrap();
    vm.set_closure_upvalue(b, 0, up_a).unwrap();
    vm.close_upvalues(0).unwrap();
    vm.reset_stack();

    let before = vm.heap().object_count();
    vm.collect_garbage();
    assert_eq!(before, 5);
    assert_eq!(vm.heap().object_count(), 0);
    assert_eq!(vm.gc_stats().objects_freed, 5);
}

#[test]
fn stress_collection_preserves_rooted_structure() {
    let mut vm = stress_vm();
    let function = vm.new_function(Some("f"), 0).unwrap();
    vm.push(Value::Obj(function)).unwrap();
    for i in 0..32 {
        let s = vm.copy_string(&format!("c{}", i)).unwrap();
        vm.add_constant(function, Value::Obj(s)).unwrap();
        vm.write_chunk(function, Op::Constant as u8, 1).unwrap();
        vm.write_chunk(function, i as u8, 1).unwrap();
    }
    assert!(vm.gc_stats().cycles > 0);

    let chunk = &vm.heap().function(function).unwrap().chunk;
    assert_eq!(chunk.len(), 64);
    let listing = disassemble_chunk(vm.heap(), chunk, "f");
    assert!(listing.contains("OP_CONSTANT        31 'c31'"), "{}", listing);
}

// ============================================================================
// Upvalue sharing
// ============================================================================

#[test]
fn closures_share_one_upvalue_cell() {
    let mut vm = VM::new();
    let outer_fn = vm.new_function(Some("outer"), 0).unwrap();
    vm.push(Value::Obj(outer_fn)).unwrap();
    let outer = vm.new_closure(outer_fn).unwrap();
    vm.pop().unwrap();
    vm.push(Value::Obj(outer)).unwrap();
    vm.call_frame(outer, 0).unwrap();

    // Local in slot 1 of the outer frame.
    vm.push(Value::Number(1.0)).unwrap();

    let inner_fn = vm.new_function(Some("inner"), 0).unwrap();
    vm.set_upvalue_count(inner_fn, 1).unwrap();
    vm.push(Value::Obj(inner_fn)).unwrap();
    let first = vm.new_closure(inner_fn).unwrap();
    vm.push(Value::Obj(first)).unwrap();
    let second = vm.new_closure(inner_fn).unwrap();
    vm.push(Value::Obj(second)).unwrap();

    let up = vm.capture_upvalue(1).unwrap();
    vm.set_closure_upvalue(first, 0, up).unwrap();
    let up = vm.capture_upvalue(1).unwrap();
    vm.set_closure_upvalue(second, 0, up).unwrap();
    assert_eq!(vm.closure_upvalue(first, 0).unwrap(), vm.closure_upvalue(second, 0).unwrap());
    assert_eq!(vm.open_upvalue_count(), 1);

    // While open, writes through either closure land in the stack slot.
    let via_first = vm.closure_upvalue(first, 0).unwrap();
    let via_second = vm.closure_upvalue(second, 0).unwrap();
    vm.upvalue_set(via_first, Value::Number(5.0)).unwrap();
    assert_eq!(vm.upvalue_get(via_second).unwrap(), Value::Number(5.0));
    assert_eq!(vm.stack_slot(1).unwrap(), Value::Number(5.0));

    let name = vm.copy_string("second").unwrap();
    vm.define_global(name, Value::Obj(second)).unwrap();
    vm.return_frame(Value::Obj(first)).unwrap();

    assert_eq!(vm.open_upvalue_count(), 0);
    assert_eq!(vm.stack_len(), 1);
    assert_eq!(vm.upvalue_get(via_first).unwrap(), Value::Number(5.0));
    assert_eq!(vm.upvalue_get(via_second).unwrap(), Value::Number(5.0));

    vm.upvalue_set(via_second, Value::Number(7.0)).unwrap();
    assert_eq!(vm.upvalue_get(via_first).unwrap(), Value::Number(7.0));

    vm.collect_garbage();
    assert_eq!(vm.upvalue_get(via_first).unwrap(), Value::Number(7.0));
    assert_eq!(vm.format_value(Value::Obj(first)), "<fn inner>");
}
