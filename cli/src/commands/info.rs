//! Info command implementation.

use airlift_core::DeviceIdentity;

/// Display device information.
pub fn show_info(device_name: String) {
    let identity = DeviceIdentity::new(device_name);

    println!("\n\x1b[1mAirlift Device Info\x1b[0m");
    println!("═══════════════════════════════════════");
    println!("\x1b[1mName:\x1b[0m {}", identity.name);
    println!("\x1b[1mID:\x1b[0m   {}", identity.id);

    println!("\n\x1b[1mLocal IPs:\x1b[0m");
    for ip in airlift_core::discovery::get_local_ips() {
        println!("  • {}", ip);
    }
    println!();
}
