pub struct Icons;

impl Icons {
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const STATS: &str = "📊";
    pub const RECORD: &str = "📄";
    pub const EMPTY: &str = "∅";
    pub const DEL: &str = "🗑️";
    pub const MIGRATE: &str = "🚚";
    pub const SEED: &str = "🌱";
}
