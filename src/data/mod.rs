/// Data layer: core types, table sources, and cleaning.
///
/// Architecture:
/// ```text
///  .db / .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │ catalog   │  list tables, read one → RawTable
///   └──────────┘
///        │
///        ▼
///   ┌────────────┐
///   │ preprocess  │  parse index, encode, drop, sort → CleanTable
///   └────────────┘
///        │
///        ▼
///   features + target + index, ready for a model
/// ```

pub mod catalog;
pub mod loader;
pub mod model;
pub mod preprocess;
