pub mod jsonl;
pub mod payload;
pub mod redirect_form;
