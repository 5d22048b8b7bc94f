use uuid::Uuid;

/**
 * How long (milliseconds) a device may stay in Connecting before the attempt is abandoned.
 */
pub const CONNECT_TIMEOUT: u64 = 16000;

/**
 * How long (milliseconds) a device may stay in Disconnecting before it is considered disconnected.
 */
pub const DISCONNECT_TIMEOUT: u64 = 16000;

// Raw connection state values as reported by the stack
pub const CONNECTION_STATE_DISCONNECTED: i32 = 0;
pub const CONNECTION_STATE_CONNECTING: i32 = 1;
pub const CONNECTION_STATE_CONNECTED: i32 = 2;
pub const CONNECTION_STATE_DISCONNECTING: i32 = 3;

// Raw bond state values
pub const BOND_NONE: i32 = 10;
pub const BOND_BONDING: i32 = 11;
pub const BOND_BONDED: i32 = 12;

// Raw per-device profile priority values
pub const PRIORITY_UNDEFINED: i32 = -1;
pub const PRIORITY_OFF: i32 = 0;
pub const PRIORITY_ON: i32 = 100;
pub const PRIORITY_AUTO_CONNECT: i32 = 1000;

/**
 * Capability bit reported with DeviceAvailable: set for the right side of a set, clear for the left.
 */
pub const CAPABILITY_SIDE_RIGHT: u8 = 0x01;

/**
 * Capability bit reported with DeviceAvailable: the device is one of a binaural set.
 */
pub const CAPABILITY_BINAURAL: u8 = 0x02;

/**
 * The 16-bit service UUID advertised by hearing aids (ASHA), expanded with the base UUID.
 */
pub const HEARING_AID_SERVICE: Uuid = Uuid::from_u128(0x0000fdf0_0000_1000_8000_00805f9b34fb);
