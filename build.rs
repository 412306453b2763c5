use esp_config::{generate_config, ConfigOption, DisplayHint, Stability, Validator, Value};

fn main() {
    generate_config(
        "rt2860",
        &[
            ConfigOption {
                name: "rx_ring_count".into(),
                description: "Amount of descriptors (and buffers) in the RX ring".into(),
                default_value: Value::Integer(128),
                constraint: Some(Validator::IntegerInRange(4..4096)),
                stability: Stability::Stable("0.1.0".into()),
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: "tx_ring_count".into(),
                description: "Amount of descriptors in each of the six TX rings".into(),
                default_value: Value::Integer(256),
                constraint: Some(Validator::IntegerInRange(4..4096)),
                stability: Stability::Stable("0.1.0".into()),
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: "max_scatter".into(),
                description: "Maximum amount of DMA segments a single TX payload may be mapped into".into(),
                default_value: Value::Integer(10),
                constraint: Some(Validator::PositiveInteger),
                stability: Stability::Stable("0.1.0".into()),
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: "rx_process_limit".into(),
                description: "Default amount of RX descriptors processed per RX done task invocation".into(),
                default_value: Value::Integer(100),
                constraint: Some(Validator::PositiveInteger),
                stability: Stability::Stable("0.1.0".into()),
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: "output_queue_len".into(),
                description: "Amount of frames the software output queue can hold".into(),
                default_value: Value::Integer(64),
                constraint: Some(Validator::PositiveInteger),
                stability: Stability::Stable("0.1.0".into()),
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: "rx_buffer_size".into(),
                description: "Size of a single RX buffer in bytes".into(),
                default_value: Value::Integer(4096),
                constraint: Some(Validator::IntegerInRange(256..0x4000)),
                stability: Stability::Stable("0.1.0".into()),
                active: true,
                display_hint: DisplayHint::None,
            },
        ],
        false,
        true,
    );
}
