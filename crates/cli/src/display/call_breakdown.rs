use flowbridge_core::PreparedCall;

pub fn print_prepared_call(prepared: &PreparedCall) {
    println!("🚀 Command: {}", prepared.invocation.to_shell_command());
    println!("   🔧 Call breakdown:");
    println!("      • entry: {}", prepared.entry);
    println!("      • runtime: {}", prepared.runtime.as_str());
    match (&prepared.timeout_label, prepared.timeout) {
        (Some(label), Some(timeout)) => println!("      • timeout: {label} ({timeout:?})"),
        _ => println!("      • timeout: none"),
    }
    if let Some(ref dir) = prepared.invocation.working_dir {
        println!("      • workingDir: {}", dir.display());
    }
    if !prepared.invocation.env.is_empty() {
        println!("      • env:");
        for (key, value) in &prepared.invocation.env {
            println!("          {key}={}", abbreviate(value));
        }
    }
}

/// Payload and context values can be large; keep the breakdown readable.
fn abbreviate(value: &str) -> String {
    const LIMIT: usize = 80;
    if value.chars().count() <= LIMIT {
        value.to_string()
    } else {
        let head: String = value.chars().take(LIMIT).collect();
        format!("{head}…")
    }
}
