pub mod simplejson;
