
/// End-to-end scenarios through the whole hierarchy.
mod scenarios;
