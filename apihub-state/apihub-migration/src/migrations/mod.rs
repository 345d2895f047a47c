pub mod m20250601_000001_create_migration_tables;
