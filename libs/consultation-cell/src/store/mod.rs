pub mod in_memory;
pub mod supabase;

pub use in_memory::InMemoryConsultationStore;
pub use supabase::SupabaseConsultationStore;
