use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Spread player colours around the hue wheel by client ID
pub fn generate_color(client_id: u32) -> String {
    let hue = (client_id as u64 * 137) % 360;
    format!("hsl({}, 70%, 50%)", hue)
}
