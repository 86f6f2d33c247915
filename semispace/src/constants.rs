/// Number of object slots in a single semispace. A generation owns two
/// spaces of this size, so its total footprint is twice this value.
pub const DEFAULT_SPACE_CAPACITY: u32 = 256;
