use std::io::{self, Write};

pub fn show_menu() {
    println!("\n===========================================");
    println!("ECG Telemetry Relay");
    println!("===========================================");
    println!("Select an option:");
    println!("1. Threaded Provider");
    println!("2. Async Provider");
    println!("3. Benchmark Mode (Async vs Threaded)");
    println!("4. Live ECG Monitor");
    println!("5. Ingest Server (HTTP upload + relay)");
    println!("6. Exit");
    println!("===========================================");
    print!("Choice (1-6): ");
    let _ = io::stdout().flush();
}

/// `None` on unreadable or non-numeric input; EOF maps to exit.
pub fn get_user_choice() -> Option<u32> {
    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) => Some(6),
        Ok(_) => input.trim().parse::<u32>().ok(),
        Err(_) => None,
    }
}

pub fn wait_for_enter() {
    println!("\nPress Enter to return to menu...");
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);
}
