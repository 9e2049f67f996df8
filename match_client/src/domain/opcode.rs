// Opcode identifiers and the two ways of assigning them.

/// Numeric tag identifying a message kind on the wire.
pub type Opcode = i64;

/// Opcode the match server broadcasts movement state on. Pinned so every
/// client and the server agree regardless of key hashing.
pub const OPCODE_PLAYER_MOVE: Opcode = 1;

/// Stable symbolic keys shared by every client build.
pub mod keys {
    pub const PLAYER_MOVE: &str = "player_move";
    pub const PLAYER_ACTION: &str = "player_action";
    pub const GAME_STATE_SYNC: &str = "game_state_sync";
    pub const PLAYER_JOIN: &str = "player_join";
    pub const PLAYER_LEAVE: &str = "player_leave";
}

/// How a symbolic key is turned into its numeric opcode.
///
/// Resolved once at registration; the registry only ever stores the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeAssignment {
    /// Hash of the key itself.
    Derived,
    /// Caller-supplied value, used when a fixed numeric contract exists.
    Pinned(Opcode),
}

impl OpcodeAssignment {
    pub fn resolve(self, key: &str) -> Opcode {
        match self {
            OpcodeAssignment::Derived => derive_opcode(key),
            OpcodeAssignment::Pinned(opcode) => opcode,
        }
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over the key bytes, identical on every platform and process.
pub fn derive_opcode(key: &str) -> Opcode {
    let hash = key.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    hash as Opcode
}
