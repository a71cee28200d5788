pub mod kmz_collect;
