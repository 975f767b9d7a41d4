
mod aggregated_h1;
mod timeout_cancel;
