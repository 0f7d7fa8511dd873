pub mod listing_writer;
