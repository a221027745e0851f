mod helpers;
mod loans;
mod misc;
mod webhooks;
