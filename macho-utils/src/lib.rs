pub mod macho;
