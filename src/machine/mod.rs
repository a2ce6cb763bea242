pub mod generic;
pub mod ikbd;
