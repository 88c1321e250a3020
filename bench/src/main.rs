use npa::{RuntimeConfig, VM, Value, VmError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

const NAMES: usize = 10_000;
const ROUNDS: usize = 20;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    npa_secs: f64,
    rust_time_secs: f64,
    gc_cycles: usize,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

fn names() -> Vec<String> {
    (0..NAMES).map(|i| format!("name_{}", i)).collect()
}

fn time<F>(f: F) -> f64
where
    F: FnOnce(),
{
    let start = Instant::now();
    f();
    start.elapsed().as_secs_f64()
}

fn small_heap() -> RuntimeConfig {
    RuntimeConfig {
        gc_min_threshold: 64 * 1024,
        ..Default::default()
    }
}

// Rust reference implementations

fn rust_intern(names: &[String]) {
    let mut set: HashSet<&str> = HashSet::new();
    for _ in 0..ROUNDS {
        for name in names {
            set.insert(name);
        }
    }
    eprintln!("{}", set.len());
}

fn rust_table_churn(names: &[String]) {
    let mut map: HashMap<&str, f64> = HashMap::new();
    for round in 0..ROUNDS {
        for name in names {
            map.insert(name, round as f64);
        }
        for name in names.iter().step_by(2) {
            map.remove(name.as_str());
        }
    }
    eprintln!("{}", map.len());
}

fn rust_garbage(names: &[String]) {
    let mut kept = 0;
    for _ in 0..ROUNDS {
        let strings: Vec<String> = names.iter().map(|n| format!("{}!", n)).collect();
        kept += strings.len();
    }
    eprintln!("{}", kept);
}

// The same workloads against the VM

fn npa_intern(names: &[String]) -> usize {
    let mut vm = VM::new();
    for _ in 0..ROUNDS {
        for name in names {
            if let Err(e) = vm.copy_string(name) {
                eprintln!("intern failed: {}", e);
                return vm.gc_stats().cycles;
            }
        }
    }
    eprintln!("{}", vm.strings().len());
    vm.gc_stats().cycles
}

fn npa_table_churn(names: &[String]) -> usize {
    let mut vm = VM::new_with_config(small_heap());
    if let Err(e) = table_churn(&mut vm, names) {
        eprintln!("table churn failed: {}", e);
    }
    vm.gc_stats().cycles
}

fn table_churn(vm: &mut VM, names: &[String]) -> Result<(), VmError> {
    let mut keys = Vec::with_capacity(names.len());
    for name in names {
        let key = vm.copy_string(name)?;
        vm.define_global(key, Value::Nil)?;
        keys.push(key);
    }
    for round in 0..ROUNDS {
        for &key in &keys {
            vm.define_global(key, Value::Number(round as f64))?;
        }
        for &key in keys.iter().step_by(2) {
            vm.delete_global(key);
        }
    }
    eprintln!("{}", vm.globals().len());
    Ok(())
}

fn npa_garbage(names: &[String]) -> usize {
    let mut vm = VM::new_with_config(small_heap());
    for _ in 0..ROUNDS {
        for name in names {
            if let Err(e) = vm.take_string(format!("{}!", name)) {
                eprintln!("allocation failed: {}", e);
                return vm.gc_stats().cycles;
            }
        }
    }
    vm.collect_garbage();
    eprintln!("{}", vm.heap().object_count());
    vm.gc_stats().cycles
}

fn bench(
    name: &str,
    names: &[String],
    npa: fn(&[String]) -> usize,
    rust: fn(&[String]),
) -> BenchmarkResult {
    let rust_time = time(|| rust(names));
    let mut gc_cycles = 0;
    let npa_time = time(|| gc_cycles = npa(names));
    BenchmarkResult {
        name: name.to_string(),
        npa_secs: npa_time,
        rust_time_secs: rust_time,
        gc_cycles,
    }
}

fn main() {
    let names = names();
    let results = vec![
        bench("intern", &names, npa_intern, rust_intern),
        bench("table_churn", &names, npa_table_churn, rust_table_churn),
        bench("garbage", &names, npa_garbage, rust_garbage),
    ];

    let output = BenchmarkOutput { results };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
