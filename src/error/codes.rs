/// Error code registry for qapflow
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 3000-3999: Output / storage errors
/// - 4000-4999: Dispatch and execution errors
/// - 5000-5999: Run lifecycle errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_MISSING_REQUIRED: u16 = 1004;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;
    pub const CONFIG_INVALID_SUBLIST: u16 = 1010;
    pub const CONFIG_EMPTY_IDENTIFIER: u16 = 1011;
    pub const CONFIG_UNSAFE_IDENTIFIER: u16 = 1012;

    // Output errors (3000-3999)
    pub const SINK_GENERIC: u16 = 3000;
    pub const SINK_IO_ERROR: u16 = 3001;
    pub const SINK_PERMISSION_DENIED: u16 = 3002;
    pub const SINK_DISK_FULL: u16 = 3003;
    pub const SINK_SERIALIZATION_ERROR: u16 = 3011;
    pub const SINK_RENDER_ERROR: u16 = 3020;

    // Dispatch errors (4000-4999)
    pub const DISPATCH_BUDGET_EXCEEDED: u16 = 4011;

    // Run lifecycle errors (5000-5999)
    pub const RUN_INCOMPLETE: u16 = 5001;
    pub const RUN_CANCELLED: u16 = 5006;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}
