//! Views: index lists into a provider's units.
//!
//! A view never owns units. Slicing a view selects from its own index list,
//! so nested slices compose. Single views (one unit, selected by index or
//! name) give access to that unit's auxiliary objects; multi views can be
//! sliced further and iterated.

use std::collections::BTreeSet;

use crate::array::Operator;
use crate::error::{Error, Result};
use crate::fits::Header;
use crate::headers::HeaderCollection;
use crate::provider::{AppendOptions, Found, Payload, Provider};
use crate::selector::Selector;
use crate::table::Table;
use crate::unit::{is_object_name, AuxObject, Unit};

fn compose(
    provider: &Provider,
    indices: &[usize],
    single: bool,
    selector: Selector,
) -> Result<(Vec<usize>, bool)> {
    if single {
        return Err(Error::InvalidView("can't slice a single slice"));
    }
    let (positions, single) = selector.resolve(&provider.unit_keys(indices))?;
    Ok((positions.into_iter().map(|p| indices[p]).collect(), single))
}

fn exposed(provider: &Provider, indices: &[usize], single: bool) -> BTreeSet<String> {
    let mut names = provider.exposed();
    if single {
        if let Some(unit) = indices.first().and_then(|&i| provider.unit(i)) {
            names.extend(unit.aux_names().map(str::to_string));
        }
    }
    names
}

/// Shared view of some units of a provider.
#[derive(Debug, Clone)]
pub struct View<'a> {
    provider: &'a Provider,
    indices: Vec<usize>,
    single: bool,
}

impl<'a> View<'a> {
    pub(crate) fn new(provider: &'a Provider, indices: Vec<usize>, single: bool) -> Self {
        View {
            provider,
            indices,
            single,
        }
    }

    pub fn provider(&self) -> &'a Provider {
        self.provider
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Provider indices of the addressed units, in view order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn units(&self) -> impl Iterator<Item = &'a Unit> + '_ {
        let provider = self.provider;
        self.indices.iter().filter_map(move |&i| provider.unit(i))
    }

    /// The unit of a single view.
    pub fn unit(&self) -> Option<&'a Unit> {
        if self.single {
            self.indices.first().and_then(|&i| self.provider.unit(i))
        } else {
            None
        }
    }

    /// One single view per addressed unit. A single view yields itself.
    pub fn iter(&self) -> impl Iterator<Item = View<'a>> + '_ {
        let provider = self.provider;
        self.indices.iter().map(move |&i| View::new(provider, vec![i], true))
    }

    /// Select from this view's units. Fails on single views.
    pub fn slice(&self, selector: impl Into<Selector>) -> Result<View<'a>> {
        let (indices, single) =
            compose(self.provider, &self.indices, self.single, selector.into())?;
        Ok(View::new(self.provider, indices, single))
    }

    /// An auxiliary object of the single unit.
    pub fn get_aux(&self, name: &str) -> Result<&'a AuxObject> {
        let unit = self
            .unit()
            .ok_or(Error::InvalidView("auxiliary objects are only available on single slices"))?;
        unit.aux(name).ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// A container table, else an auxiliary object of an addressed unit.
    pub fn lookup(&self, name: &str) -> Result<Found<'a>> {
        self.provider.lookup_in(&self.indices, name)
    }

    pub fn exposed(&self) -> BTreeSet<String> {
        exposed(self.provider, &self.indices, self.single)
    }

    pub fn phu(&self) -> &'a Header {
        self.provider.phu()
    }

    pub fn hdr(&self) -> HeaderCollection<&'a Header> {
        HeaderCollection::new(self.units().map(|u| &u.header).collect())
    }
}

/// Exclusive view of some units of a provider.
#[derive(Debug)]
pub struct ViewMut<'a> {
    provider: &'a mut Provider,
    indices: Vec<usize>,
    single: bool,
}

impl<'a> ViewMut<'a> {
    pub(crate) fn new(provider: &'a mut Provider, indices: Vec<usize>, single: bool) -> Self {
        ViewMut {
            provider,
            indices,
            single,
        }
    }

    /// A shared view of the same units.
    pub fn as_view(&self) -> View<'_> {
        View::new(self.provider, self.indices.clone(), self.single)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// The unit of a single view.
    pub fn unit_mut(&mut self) -> Option<&mut Unit> {
        if !self.single {
            return None;
        }
        let index = *self.indices.first()?;
        self.provider.unit_mut(index)
    }

    pub fn slice_mut(&mut self, selector: impl Into<Selector>) -> Result<ViewMut<'_>> {
        let (indices, single) =
            compose(self.provider, &self.indices, self.single, selector.into())?;
        Ok(ViewMut::new(self.provider, indices, single))
    }

    fn single_index(&self, message: &'static str) -> Result<usize> {
        match (self.single, self.indices.first()) {
            (true, Some(&index)) => Ok(index),
            _ => Err(Error::InvalidView(message)),
        }
    }

    /// Attach `payload` to the single unit under the upper-case `name`.
    ///
    /// `VAR` and `DQ` replace the uncertainty and mask; other names store an
    /// auxiliary object.
    pub fn set_aux(&mut self, name: &str, payload: impl Into<Payload>) -> Result<()> {
        if !is_object_name(name) {
            return Err(Error::InvalidValue("auxiliary names must be upper case"));
        }
        let index =
            self.single_index("this attribute can only be assigned to a single-slice object")?;
        let options = AppendOptions::default().with_name(name).with_add_to(index);
        self.provider.append(payload, options).map(|_| ())
    }

    /// Delete an auxiliary object from the single unit.
    pub fn delete_aux(&mut self, name: &str) -> Result<AuxObject> {
        if !is_object_name(name) {
            return Err(Error::InvalidValue("can't delete non-capitalized attributes from slices"));
        }
        let index = self.single_index("can't delete attributes on non-single slices")?;
        match self.provider.unit_mut(index) {
            Some(unit) => unit.remove_aux(name),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    /// Store a container table on the underlying provider.
    pub fn set_table(&mut self, name: &str, table: Table) -> Result<()> {
        self.provider.set_table(name, table)
    }

    /// Views cannot remove units.
    pub fn remove(&mut self, _index: usize) -> Result<Unit> {
        Err(Error::InvalidView("can't remove items from a sliced object"))
    }

    /// Inclusive crop of the addressed units only.
    pub fn crop(&mut self, x1: usize, y1: usize, x2: usize, y2: usize) -> Result<&mut Self> {
        self.provider.crop_units(&self.indices, x1, y1, x2, y2)?;
        Ok(self)
    }

    pub fn apply_scalar(&mut self, op: Operator, operand: f64) -> Result<&mut Self> {
        self.provider.apply_scalar_units(&self.indices, op, operand)?;
        Ok(self)
    }

    pub fn add(&mut self, operand: f64) -> Result<&mut Self> {
        self.apply_scalar(Operator::Add, operand)
    }

    pub fn subtract(&mut self, operand: f64) -> Result<&mut Self> {
        self.apply_scalar(Operator::Subtract, operand)
    }

    pub fn multiply(&mut self, operand: f64) -> Result<&mut Self> {
        self.apply_scalar(Operator::Multiply, operand)
    }

    pub fn divide(&mut self, operand: f64) -> Result<&mut Self> {
        self.apply_scalar(Operator::Divide, operand)
    }

    pub fn exposed(&self) -> BTreeSet<String> {
        exposed(self.provider, &self.indices, self.single)
    }

    pub fn phu_mut(&mut self) -> &mut Header {
        self.provider.phu_mut()
    }

    /// Metadata records of the addressed units. Repeated indices appear once.
    pub fn hdr_mut(&mut self) -> HeaderCollection<&mut Header> {
        HeaderCollection::new(self.provider.headers_mut(&self.indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{DataType, ImageData};
    use crate::fits::Value;

    fn provider(n: usize) -> Provider {
        let mut p = Provider::new();
        for i in 0..n {
            let data = ImageData::from_shape_vec(&[2, 2], vec![i as f32; 4]).unwrap();
            p.append(data, AppendOptions::default()).unwrap();
        }
        p
    }

    #[test]
    fn nested_slices_compose() {
        let p = provider(6);
        let v = p.view(1usize..6).unwrap();
        let w = v.slice(Selector::slice(None, None, Some(2))).unwrap();
        assert_eq!(w.indices(), &[1, 3, 5]);
        let last = w.slice(-1isize).unwrap();
        assert!(last.is_single());
        assert_eq!(last.unit().unwrap().version, 6);
        assert!(matches!(last.slice(0usize), Err(Error::InvalidView(_))));
    }

    #[test]
    fn iteration_yields_single_views() {
        let p = provider(3);
        let v = p.view(..).unwrap();
        let versions: Vec<i64> = v.iter().map(|s| s.unit().unwrap().version).collect();
        assert_eq!(versions, [1, 2, 3]);
        let single = p.view(1usize).unwrap();
        assert_eq!(single.iter().count(), 1);
        assert_eq!(p.iter().count(), 3);
    }

    #[test]
    fn aux_access_needs_a_single_view() {
        let mut p = provider(2);
        let mut multi = p.view_mut(..).unwrap();
        assert!(matches!(
            multi.set_aux("OBJMASK", ImageData::zeros(DataType::U8, &[2, 2])),
            Err(Error::InvalidView(_))
        ));
        assert!(matches!(multi.delete_aux("OBJMASK"), Err(Error::InvalidView(_))));

        let mut single = p.view_mut(0usize).unwrap();
        single.set_aux("OBJMASK", ImageData::zeros(DataType::U8, &[2, 2])).unwrap();
        single.set_aux("VAR", ImageData::zeros(DataType::F32, &[2, 2])).unwrap();
        assert!(single.set_aux("objmask", Table::new()).is_err());
        assert!(single.exposed().contains("OBJMASK"));

        let view = p.view(0usize).unwrap();
        assert!(view.get_aux("OBJMASK").is_ok());
        assert!(view.unit().unwrap().uncertainty().is_some());
        assert!(matches!(p.view(..).unwrap().get_aux("OBJMASK"), Err(Error::InvalidView(_))));

        let mut single = p.view_mut(0usize).unwrap();
        single.delete_aux("OBJMASK").unwrap();
        assert!(matches!(single.delete_aux("OBJMASK"), Err(Error::NotFound(_))));
    }

    #[test]
    fn mutation_is_limited_to_the_view() {
        let mut p = provider(3);
        let mut v = p.view_mut(vec![0usize, 2]).unwrap();
        v.multiply(2.0).unwrap().add(1.0).unwrap();
        v.hdr_mut().set_all("SELECTED", true, None).unwrap();
        assert!(v.remove(0).is_err());
        v.crop(0, 0, 0, 0).unwrap();

        let first = |i: usize| p.unit(i).unwrap().data.to_data().unwrap().to_f64()[[0, 0]];
        assert_eq!((first(0), first(1), first(2)), (1.0, 1.0, 5.0));
        assert_eq!(p.unit(1).unwrap().shape(), &[2, 2]);
        assert_eq!(p.unit(2).unwrap().shape(), &[1, 1]);
        assert_eq!(
            p.hdr().get_all_or("SELECTED", false),
            vec![Value::Logical(true), Value::Logical(false), Value::Logical(true)]
        );
    }

    #[test]
    fn named_selection() {
        let p = provider(3);
        let v = p.view(Selector::named("SCI", 2)).unwrap();
        assert_eq!(v.indices(), &[1]);
        assert!(v.is_single());
    }
}
